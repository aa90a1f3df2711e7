//! Application services: everything a request handler calls.
//!
//! [`Blog`] owns the store, the index client, the token signer, the file
//! stores and the mail worker. Methods are blocking; the web layer runs them
//! on the blocking pool. The store sits behind one mutex, which also
//! serializes the "first user becomes admin" check with the insert.

pub mod books;
pub mod files;
pub mod forms;
pub mod mail;
pub mod posts;
pub mod users;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use thiserror::Error;

use crate::auth::TokenSigner;
use crate::config::Config;
use crate::search::client::IndexClient;
use crate::storage::{SqliteStorage, StorageError};
use files::{FileStore, UploadError};
use mail::{LogTransport, Mailer};

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("resource not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("login required")]
    Unauthorized,
    #[error("Please enter the right credentials..")]
    BadCredentials,
    #[error("Invalid/expired token")]
    InvalidToken,
    #[error("invalid input")]
    Validation(ValidationErrors),
    #[error("search is unavailable")]
    SearchUnavailable,
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for BlogError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StorageError>() {
            Some(StorageError::NotFound { .. }) => BlogError::NotFound,
            None => BlogError::Internal(err),
        }
    }
}

pub type BlogResult<T> = Result<T, BlogError>;

/// Field name → messages, in field order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<&'static str, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn into_result(self) -> BlogResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(BlogError::Validation(self))
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BlogSettings {
    pub per_page_home: usize,
    pub per_page_global: usize,
    pub reset_token_ttl: Duration,
    pub session_ttl: Duration,
    pub mail_sender: String,
    pub public_url: String,
}

impl BlogSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            per_page_home: config.per_page_home,
            per_page_global: config.per_page_global,
            reset_token_ttl: config.reset_token_ttl,
            session_ttl: config.session_ttl,
            mail_sender: config.mail_sender.clone(),
            public_url: config.public_url.clone(),
        }
    }
}

impl Default for BlogSettings {
    fn default() -> Self {
        Self {
            per_page_home: 5,
            per_page_global: 10,
            reset_token_ttl: Duration::from_secs(600),
            session_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            mail_sender: "admin@blog.com".into(),
            public_url: "http://127.0.0.1:5000".into(),
        }
    }
}

pub struct Blog {
    store: Mutex<SqliteStorage>,
    index: IndexClient,
    signer: TokenSigner,
    post_images: FileStore,
    profile_pics: FileStore,
    mailer: Mailer,
    settings: BlogSettings,
}

impl Blog {
    pub fn new(
        store: SqliteStorage,
        index: IndexClient,
        signer: TokenSigner,
        post_images: FileStore,
        profile_pics: FileStore,
        mailer: Mailer,
        settings: BlogSettings,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            index,
            signer,
            post_images,
            profile_pics,
            mailer,
            settings,
        }
    }

    /// Open everything `config` points at. Mail goes to the log transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        let secret = config.require_secret()?;
        let store = SqliteStorage::open(&config.database_path)?;
        let index = crate::search::client_from_config(config)?;
        Ok(Self::new(
            store,
            index,
            TokenSigner::new(secret.as_bytes()),
            FileStore::open(&config.uploaded_path)?,
            FileStore::open(&config.profile_pics_path)?,
            Mailer::spawn(Box::new(LogTransport)),
            BlogSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &BlogSettings {
        &self.settings
    }

    pub fn index(&self) -> &IndexClient {
        &self.index
    }

    pub fn post_images(&self) -> &FileStore {
        &self.post_images
    }

    pub fn profile_pics(&self) -> &FileStore {
        &self.profile_pics
    }

    /// Stop the mail worker after it drains its queue.
    pub fn shutdown(&self) {
        self.mailer.shutdown();
    }

    fn store(&self) -> MutexGuard<'_, SqliteStorage> {
        self.store.lock()
    }

    /// Re-upsert every post into the index.
    pub fn reindex(&self) -> Result<usize> {
        let store = self.store();
        crate::search::sync::reindex_posts(&store, &self.index)
    }
}

impl std::fmt::Debug for Blog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blog")
            .field("index", &self.index)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_group_by_field() {
        let mut errors = ValidationErrors::new();
        assert!(errors.clone().into_result().is_ok());
        errors.add("username", "Username is already taken!");
        errors.add("email", "Invalid email address.");
        errors.add("username", "Field must be between 5 and 20 characters long.");
        assert_eq!(errors.field("username").len(), 2);
        assert!(errors.field("password").is_empty());
        assert_eq!(
            errors.to_string(),
            "email: Invalid email address.; username: Username is already taken!; \
             username: Field must be between 5 and 20 characters long."
        );
        assert!(matches!(errors.into_result(), Err(BlogError::Validation(_))));
    }

    #[test]
    fn vanished_rows_surface_as_not_found() {
        let gone = anyhow::Error::from(StorageError::NotFound { table: "post", id: 7 })
            .context("updating post 7");
        assert!(matches!(BlogError::from(gone), BlogError::NotFound));
        let other = anyhow::anyhow!("disk I/O error");
        assert!(matches!(BlogError::from(other), BlogError::Internal(_)));
    }
}
