//! Accounts: registration, login, profile, deactivation, password reset.

use tracing::info;

use super::files::PROFILE_PIC_EXTENSIONS;
use super::forms::{
    EMAIL_TAKEN, LoginForm, RegistrationForm, RequestResetForm, ResetPasswordForm,
    USERNAME_TAKEN, UpdateAccountForm,
};
use super::mail::reset_email;
use super::{Blog, BlogError, BlogResult};
use crate::auth::{TokenPurpose, hash_password, verify_password};
use crate::model::types::{NewUser, User};

pub const ADMIN_DEACTIVATION_REJECTED: &str = "Admin account cannot be deactivated";
pub const RESET_REQUESTED: &str = "An email has been sent with instructions to reset your password";

/// Result of a deactivation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deactivation {
    Deactivated,
    /// Nothing was changed.
    Rejected { message: &'static str },
}

/// A logged-in user and their session token.
#[derive(Debug, Clone)]
pub struct Login {
    pub user: User,
    pub token: String,
    pub remember: bool,
}

impl Blog {
    /// Create an account. The first account ever created is the admin.
    pub fn register(&self, form: &RegistrationForm) -> BlogResult<User> {
        form.validate().into_result()?;
        let username = form.username.trim().to_string();
        let email = form.email.trim().to_string();
        let password_hash = hash_password(&form.password)?;

        let mut store = self.store();
        let mut errors = super::ValidationErrors::new();
        if store.user_by_username(&username)?.is_some() {
            errors.add("username", USERNAME_TAKEN);
        }
        if store.user_by_email(&email)?.is_some() {
            errors.add("email", EMAIL_TAKEN);
        }
        errors.into_result()?;

        let mut uow = store.begin()?;
        let is_admin = !uow.admin_exists()?;
        let user = uow.add_user(NewUser {
            username,
            email,
            password_hash,
            is_admin,
        })?;
        uow.commit(&self.index)?;
        info!(user_id = user.id, is_admin, "registered user");
        Ok(user)
    }

    /// Check credentials and issue a session token.
    pub fn login(&self, form: &LoginForm) -> BlogResult<Login> {
        form.validate().into_result()?;
        let user = self
            .store()
            .user_by_email(form.email.trim())?
            .ok_or(BlogError::BadCredentials)?;
        if !verify_password(&form.password, &user.password)? {
            return Err(BlogError::BadCredentials);
        }
        let token = self
            .signer
            .sign(user.id, TokenPurpose::Session, self.settings.session_ttl);
        Ok(Login {
            user,
            token,
            remember: form.remember,
        })
    }

    /// The user a session token belongs to. Invalid, expired, or orphaned
    /// tokens resolve to `None`.
    pub fn session_user(&self, token: &str) -> BlogResult<Option<User>> {
        let Ok(user_id) = self.signer.verify(token, TokenPurpose::Session) else {
            return Ok(None);
        };
        Ok(self.store().user_by_id(user_id)?)
    }

    pub fn user(&self, user_id: i64) -> BlogResult<User> {
        self.store().user_by_id(user_id)?.ok_or(BlogError::NotFound)
    }

    /// Change username and email. Uniqueness is checked against other users.
    pub fn update_account(&self, user_id: i64, form: &UpdateAccountForm) -> BlogResult<User> {
        form.validate().into_result()?;
        let username = form.username.trim();
        let email = form.email.trim();

        let mut store = self.store();
        let mut user = store.user_by_id(user_id)?.ok_or(BlogError::NotFound)?;
        let mut errors = super::ValidationErrors::new();
        if let Some(other) = store.user_by_username(username)?
            && other.id != user.id
        {
            errors.add("username", USERNAME_TAKEN);
        }
        if let Some(other) = store.user_by_email(email)?
            && other.id != user.id
        {
            errors.add("email", EMAIL_TAKEN);
        }
        errors.into_result()?;

        user.username = username.to_string();
        user.email = email.to_string();
        let mut uow = store.begin()?;
        uow.update_user(&user)?;
        uow.commit(&self.index)?;
        Ok(user)
    }

    /// Store a new profile picture and drop the old one. If the row cannot
    /// be updated the new file is removed again.
    pub fn set_profile_picture(
        &self,
        user_id: i64,
        original_name: &str,
        bytes: &[u8],
    ) -> BlogResult<User> {
        let mut store = self.store();
        let mut user = store.user_by_id(user_id)?.ok_or(BlogError::NotFound)?;
        let stored = self
            .profile_pics
            .save(original_name, bytes, PROFILE_PIC_EXTENSIONS)?;
        let old = std::mem::replace(&mut user.profile_pic, stored);

        let saved = store.begin().and_then(|mut uow| {
            uow.update_user(&user)?;
            uow.commit(&self.index)
        });
        if let Err(err) = saved {
            // Nothing references the new file.
            self.profile_pics.remove_logged(&user.profile_pic);
            return Err(err.into());
        }
        self.profile_pics.delete_profile_picture(&old);
        Ok(user)
    }

    /// Delete the account with everything it owns. The admin is refused.
    pub fn deactivate(&self, user_id: i64) -> BlogResult<Deactivation> {
        let mut store = self.store();
        let user = store.user_by_id(user_id)?.ok_or(BlogError::NotFound)?;
        if user.is_admin {
            return Ok(Deactivation::Rejected {
                message: ADMIN_DEACTIVATION_REJECTED,
            });
        }

        let mut uow = store.begin()?;
        uow.delete_user(&user)?;
        let report = uow.commit(&self.index)?;
        drop(store);
        self.profile_pics.delete_profile_picture(&user.profile_pic);
        info!(
            user_id,
            index_removed = report.removed,
            "deactivated account"
        );
        Ok(Deactivation::Deactivated)
    }

    /// Queue a reset mail if the address is known. The returned message is
    /// the same either way.
    pub fn request_password_reset(&self, form: &RequestResetForm) -> BlogResult<&'static str> {
        form.validate().into_result()?;
        let user = self.store().user_by_email(form.email.trim())?;
        if let Some(user) = user {
            let token = self.signer.sign(
                user.id,
                TokenPurpose::PasswordReset,
                self.settings.reset_token_ttl,
            );
            let url = format!("{}/reset_password/{token}", self.settings.public_url);
            self.mailer
                .enqueue(reset_email(&user, &self.settings.mail_sender, &url));
            info!(user_id = user.id, "queued password reset mail");
        }
        Ok(RESET_REQUESTED)
    }

    /// The user a reset token was issued for.
    pub fn verify_reset_token(&self, token: &str) -> BlogResult<User> {
        let user_id = self
            .signer
            .verify(token, TokenPurpose::PasswordReset)
            .map_err(|_| BlogError::InvalidToken)?;
        self.store()
            .user_by_id(user_id)?
            .ok_or(BlogError::InvalidToken)
    }

    pub fn reset_password(&self, token: &str, form: &ResetPasswordForm) -> BlogResult<User> {
        let mut user = self.verify_reset_token(token)?;
        form.validate().into_result()?;
        user.password = hash_password(&form.password)?;

        let mut store = self.store();
        let mut uow = store.begin()?;
        uow.update_user(&user)?;
        uow.commit(&self.index)?;
        info!(user_id = user.id, "password reset");
        Ok(user)
    }
}
