//! Flash page planning.
//!
//! The device programs flash one page per command. [`ChunkPlanner`] walks the
//! image in page-sized steps and hands out the pages in order.
//!
//! ```text
//! image:   |<------ 4096 ------>|<------ 4096 ------>|<- rest ->|
//! cursor:  0                    4096                 8192       total
//! ```

use super::FirmwareImage;
use log::trace;

/// Flash page size of the target in bytes.
pub const FLASH_PAGE_SIZE: usize = 4096;

/// One flash page: a contiguous slice of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a> {
    /// Zero-based page index.
    pub index: usize,
    /// Byte offset of the page inside the image.
    pub offset: usize,
    /// Page contents; shorter than [`FLASH_PAGE_SIZE`] only for the last page.
    pub data: &'a [u8],
}

impl Page<'_> {
    /// Page length in bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the page holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}

/// Sequential page cursor over a firmware image.
///
/// The cursor always advances by a whole page, so a short final page is
/// followed directly by end of data.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    image: FirmwareImage,
    cursor: usize,
    bytes_read: usize,
}

impl ChunkPlanner {
    /// Create a planner positioned at the start of `image`.
    pub fn new(image: FirmwareImage) -> Self {
        Self {
            image,
            cursor: 0,
            bytes_read: 0,
        }
    }

    /// Rewind to the first page.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.bytes_read = 0;
    }

    /// Return the next unread page, or `None` once the image is exhausted.
    pub fn next_page(&mut self) -> Option<Page<'_>> {
        let total = self
            .image
            .total_bytes();
        if self.cursor >= total {
            return None;
        }

        let start = self.cursor;
        let end = (start + FLASH_PAGE_SIZE).min(total);
        self.cursor += FLASH_PAGE_SIZE;
        self.bytes_read += end - start;
        trace!("Page [{start}, {end}) of {total}");

        Some(Page {
            index: start / FLASH_PAGE_SIZE,
            offset: start,
            data: &self.image.as_bytes()[start..end],
        })
    }

    /// Bytes handed out since the last reset.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Total image length.
    pub fn total_bytes(&self) -> usize {
        self.image
            .total_bytes()
    }

    /// The image being planned.
    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }
}
