//! Firmware download over HTTP.

use super::{FirmwareImage, ImageSource};
use crate::error::{Error, Result};
use log::{debug, info};
use std::time::Duration;

/// Default timeout for a firmware download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Image published on a web server as `<base_url>/<file_name>`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    file_name: String,
    timeout: Duration,
}

impl HttpSource {
    /// Create a source for `file_name` below `base_url`.
    pub fn new(base_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            file_name: file_name.into(),
            timeout: DOWNLOAD_TIMEOUT,
        }
    }

    /// Set the download timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full download URL.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url
                .trim_end_matches('/'),
            self.file_name
                .trim_start_matches('/')
        )
    }
}

impl ImageSource for HttpSource {
    fn load(&self) -> Result<FirmwareImage> {
        let url = self.url();
        info!("Downloading firmware from {url}");

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::ImageUnavailable(format!("{url}: {e}")))?;

        let response = client
            .get(&url)
            .send()
            .map_err(|e| Error::ImageUnavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::ImageUnavailable(format!(
                "Could not fetch firmware file {}: status {status}",
                self.file_name
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| Error::ImageUnavailable(format!("{url}: {e}")))?;
        debug!("Downloaded {} bytes", bytes.len());

        Ok(FirmwareImage::new(bytes.to_vec()))
    }

    fn describe(&self) -> String {
        self.url()
    }
}
