//! Request bodies and their field-level checks.
//!
//! Checks that need the store (username/email uniqueness) live with the
//! service that owns the store access.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::ValidationErrors;

pub const USERNAME_TAKEN: &str = "Username is already taken!";
pub const EMAIL_TAKEN: &str = "Email is already taken!";

const REQUIRED: &str = "This field is required.";
const INVALID_EMAIL: &str = "Invalid email address.";
const PASSWORDS_DIFFER: &str = "Field must be equal to password.";

const USERNAME_MIN: usize = 5;
const USERNAME_MAX: usize = 20;
const PASSWORD_MIN: usize = 5;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("valid email regex"));

fn required(errors: &mut ValidationErrors, field: &'static str, value: &str) -> bool {
    if value.trim().is_empty() {
        errors.add(field, REQUIRED);
        false
    } else {
        true
    }
}

fn check_username(errors: &mut ValidationErrors, username: &str) {
    if required(errors, "username", username) {
        let len = username.chars().count();
        if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
            errors.add(
                "username",
                format!("Field must be between {USERNAME_MIN} and {USERNAME_MAX} characters long."),
            );
        }
    }
}

fn check_email(errors: &mut ValidationErrors, email: &str) {
    if required(errors, "email", email) && !EMAIL_RE.is_match(email.trim()) {
        errors.add("email", INVALID_EMAIL);
    }
}

fn check_password(errors: &mut ValidationErrors, password: &str) {
    if required(errors, "password", password) && password.chars().count() < PASSWORD_MIN {
        errors.add(
            "password",
            format!("Field must be at least {PASSWORD_MIN} characters long."),
        );
    }
}

fn check_confirmation(errors: &mut ValidationErrors, password: &str, confirm: &str) {
    if required(errors, "confirm_password", confirm) && password != confirm {
        errors.add("confirm_password", PASSWORDS_DIFFER);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegistrationForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_username(&mut errors, &self.username);
        check_email(&mut errors, &self.email);
        check_password(&mut errors, &self.password);
        check_confirmation(&mut errors, &self.password, &self.confirm_password);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

impl LoginForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_email(&mut errors, &self.email);
        check_password(&mut errors, &self.password);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAccountForm {
    pub username: String,
    pub email: String,
}

impl UpdateAccountForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_username(&mut errors, &self.username);
        check_email(&mut errors, &self.email);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestResetForm {
    pub email: String,
}

impl RequestResetForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_email(&mut errors, &self.email);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetPasswordForm {
    pub password: String,
    pub confirm_password: String,
}

impl ResetPasswordForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        check_password(&mut errors, &self.password);
        check_confirmation(&mut errors, &self.password, &self.confirm_password);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostForm {
    pub title: String,
    /// Space separated.
    pub tags: String,
    pub content: String,
}

impl PostForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        required(&mut errors, "title", &self.title);
        required(&mut errors, "tags", &self.tags);
        required(&mut errors, "content", &self.content);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentForm {
    pub content: String,
}

impl CommentForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        required(&mut errors, "content", &self.content);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookForm {
    pub title: String,
    pub authors: String,
    pub edition: String,
    #[serde(default)]
    pub link: Option<String>,
    pub description: String,
}

impl BookForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        required(&mut errors, "title", &self.title);
        required(&mut errors, "authors", &self.authors);
        required(&mut errors, "edition", &self.edition);
        required(&mut errors, "description", &self.description);
        errors
    }

    /// The link, or `None` when blank.
    pub fn link(&self) -> Option<String> {
        self.link
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchForm {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub page: Option<usize>,
}

impl SearchForm {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        required(&mut errors, "q", &self.q);
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(username: &str, email: &str, password: &str, confirm: &str) -> RegistrationForm {
        RegistrationForm {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            confirm_password: confirm.into(),
        }
    }

    #[test]
    fn valid_registration_passes() {
        let form = registration("alice", "alice@example.com", "secret", "secret");
        assert!(form.validate().is_empty());
    }

    #[test]
    fn registration_field_rules() {
        let errors = registration("bob", "not-an-email", "abc", "abd").validate();
        assert_eq!(
            errors.field("username"),
            ["Field must be between 5 and 20 characters long."]
        );
        assert_eq!(errors.field("email"), [INVALID_EMAIL]);
        assert_eq!(errors.field("password"), ["Field must be at least 5 characters long."]);
        assert_eq!(errors.field("confirm_password"), [PASSWORDS_DIFFER]);

        let too_long = registration(&"x".repeat(21), "a@b.co", "secret", "secret").validate();
        assert_eq!(too_long.field("username").len(), 1);
    }

    #[test]
    fn empty_fields_are_required() {
        let errors = PostForm::default().validate();
        assert_eq!(errors.field("title"), [REQUIRED]);
        assert_eq!(errors.field("tags"), [REQUIRED]);
        assert_eq!(errors.field("content"), [REQUIRED]);
        assert_eq!(SearchForm::default().validate().field("q"), [REQUIRED]);
    }

    #[test]
    fn blank_book_link_is_none() {
        let mut form = BookForm {
            link: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(form.link(), None);
        form.link = Some("https://doc.rust-lang.org/book/".into());
        assert_eq!(form.link().as_deref(), Some("https://doc.rust-lang.org/book/"));
    }
}
