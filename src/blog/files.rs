//! Uploaded images on disk.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::types::DEFAULT_PROFILE_PIC;

/// Extensions accepted for images embedded in posts.
pub const POST_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Extensions accepted for profile pictures.
pub const PROFILE_PIC_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/// URL prefix under which post images are served.
pub const FILES_ROUTE: &str = "/files";

static POST_IMAGE_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"src="/files/([^"]+)""#).expect("post image src regex"));

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Image only!")]
    NotAnImage,
    #[error("invalid file name")]
    InvalidFilename,
    #[error("storing upload: {0}")]
    Io(#[from] io::Error),
}

/// A flat directory of randomly named files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating upload dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `bytes` under a fresh random name carrying the original
    /// extension, provided the extension is in `allowed`. Returns the stored
    /// name.
    pub fn save(
        &self,
        original_name: &str,
        bytes: &[u8],
        allowed: &[&str],
    ) -> Result<String, UploadError> {
        let ext = image_extension(original_name, allowed).ok_or(UploadError::NotAnImage)?;
        let name = format!("{}.{ext}", random_hex_name());
        std::fs::write(self.dir.join(&name), bytes)?;
        debug!(file = %name, bytes = bytes.len(), "stored upload");
        Ok(name)
    }

    /// Path of a stored file, refusing anything that is not a plain name
    /// inside this directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, UploadError> {
        if !is_plain_file_name(name) {
            return Err(UploadError::InvalidFilename);
        }
        Ok(self.dir.join(name))
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, UploadError> {
        Ok(std::fs::read(self.resolve(name)?)?)
    }

    /// Remove a stored file. Failures are logged and otherwise ignored.
    pub fn remove_logged(&self, name: &str) {
        let path = match self.resolve(name) {
            Ok(path) => path,
            Err(err) => {
                warn!(file = name, error = %err, "refusing to delete file");
                return;
            }
        };
        if let Err(err) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %err, "failed to delete file");
        }
    }

    /// Delete a replaced profile picture; the shared default is kept.
    pub fn delete_profile_picture(&self, name: &str) {
        if name == DEFAULT_PROFILE_PIC {
            return;
        }
        self.remove_logged(name);
    }

    /// Delete every image a post body references as `src="/files/<name>"`.
    pub fn delete_post_images(&self, content: &str) -> usize {
        let names = referenced_images(content);
        for name in &names {
            self.remove_logged(name);
        }
        names.len()
    }
}

/// Lowercased extension of `name` if it is one of `allowed`.
pub fn image_extension(name: &str, allowed: &[&str]) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    allowed.contains(&ext.as_str()).then_some(ext)
}

pub fn referenced_images(content: &str) -> Vec<String> {
    POST_IMAGE_SRC
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 16 lowercase hex characters.
pub fn random_hex_name() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

pub fn content_type_for(name: &str) -> &'static str {
    match name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
