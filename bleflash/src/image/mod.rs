//! Firmware image handling.
//!
//! An image is an immutable byte buffer. It is loaded once per update run by an
//! [`ImageSource`] and split into flash pages by [`ChunkPlanner`].

pub mod pages;
#[cfg(feature = "http")]
pub mod remote;

pub use pages::{ChunkPlanner, FLASH_PAGE_SIZE, Page};
#[cfg(feature = "http")]
pub use remote::HttpSource;

use crate::error::{Error, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Immutable firmware image.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Arc<[u8]>,
}

impl FirmwareImage {
    /// Wrap raw image bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::from(data.into()),
        }
    }

    /// Total image length in bytes.
    pub fn total_bytes(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the image holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }

    /// Raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of flash pages the image occupies.
    pub fn page_count(&self) -> usize {
        self.total_bytes()
            .div_ceil(FLASH_PAGE_SIZE)
    }
}

impl From<Vec<u8>> for FirmwareImage {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Somewhere a firmware image can be loaded from.
pub trait ImageSource {
    /// Load the complete image.
    ///
    /// Implementations report every failure as [`Error::ImageUnavailable`].
    fn load(&self) -> Result<FirmwareImage>;

    /// Human readable location, used in log messages.
    fn describe(&self) -> String;
}

/// Image stored in a local file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source reading from `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path
                .as_ref()
                .to_path_buf(),
        }
    }

    /// Path of the image file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for FileSource {
    fn load(&self) -> Result<FirmwareImage> {
        let data = std::fs::read(&self.path).map_err(|e| {
            Error::ImageUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        debug!("Read {} bytes from {}", data.len(), self.path.display());
        Ok(FirmwareImage::new(data))
    }

    fn describe(&self) -> String {
        self.path
            .display()
            .to_string()
    }
}

/// Image already held in memory.
impl ImageSource for FirmwareImage {
    fn load(&self) -> Result<FirmwareImage> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory image ({} bytes)", self.total_bytes())
    }
}
