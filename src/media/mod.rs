//! Profile image storage on the local filesystem.
//!
//! An upload is stored twice under a random base name: the original bytes
//! with their detected extension, and a WebP rendition. The account keeps only
//! the base name (e.g. `profile_images/3f2a...`), so removing an image means
//! removing every file sharing that stem.

use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PROFILE_IMAGE_DIR: &str = "profile_images";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Upload a valid image. The file you uploaded was either not an image or a corrupted image.")]
    InvalidImage,
    #[error("invalid stored image name: {0}")]
    InvalidName(String),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("media I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.root.join(PROFILE_IMAGE_DIR)).await
    }

    /// Validate and store an uploaded image, returning its base name
    pub async fn save_profile_image(&self, bytes: Vec<u8>) -> Result<String, MediaError> {
        self.ensure_dirs().await?;

        let stem = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{PROFILE_IMAGE_DIR}/{stem}");
        let base = self.root.join(&name);

        tokio::task::spawn_blocking(move || write_renditions(&bytes, &base)).await??;

        tracing::debug!(image = %name, "Stored profile image");
        Ok(name)
    }

    /// Remove every file stored for `name`. Returns how many were removed.
    pub async fn delete(&self, name: &str) -> Result<usize, MediaError> {
        let stem = parse_name(name)?;
        let dir = self.root.join(PROFILE_IMAGE_DIR);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        tracing::debug!(image = %name, files = removed, "Removed profile image");
        Ok(removed)
    }

    /// Paths currently stored for `name`
    pub fn files_for(&self, name: &str) -> Vec<PathBuf> {
        let Ok(stem) = parse_name(name) else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(self.root.join(PROFILE_IMAGE_DIR)) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.file_stem().and_then(|s| s.to_str()) == Some(stem))
            .collect();
        files.sort();
        files
    }
}

/// Names are `profile_images/<hex>`; anything else is refused
fn parse_name(name: &str) -> Result<&str, MediaError> {
    name.strip_prefix(PROFILE_IMAGE_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|stem| !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric()))
        .ok_or_else(|| MediaError::InvalidName(name.to_string()))
}

fn write_renditions(bytes: &[u8], base: &Path) -> Result<(), MediaError> {
    let format = image::guess_format(bytes).map_err(|_| MediaError::InvalidImage)?;
    let decoded =
        image::load_from_memory_with_format(bytes, format).map_err(|_| MediaError::InvalidImage)?;

    let ext = format.extensions_str().first().copied().unwrap_or("img");
    std::fs::write(base.with_extension(ext), bytes)?;

    // The WebP encoder only takes 8-bit buffers
    let webp = DynamicImage::ImageRgba8(decoded.to_rgba8());
    if let Err(e) = webp.save_with_format(base.with_extension("webp"), ImageFormat::WebP) {
        let _ = std::fs::remove_file(base.with_extension(ext));
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::new(1, 1);
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
