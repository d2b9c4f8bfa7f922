//! # bleflash
//!
//! A library for updating BL702 firmware over a chunked, half-duplex BLE link.
//!
//! This crate provides the protocol engine that drives a device from its
//! application into the bootloader and streams a new image into flash:
//!
//! - Flash page planning over the firmware image
//! - Packet framing with a one-byte continuation flag
//! - Acknowledgement waits with bounded timeouts
//! - A bounded retry loop modelled as an explicit state machine
//!
//! ## Transports
//!
//! The engine talks to the device through the [`Transport`] trait and receives
//! notifications (write delivered, response frame, disconnect) over a channel
//! created with [`link_channel`].
//!
//! - **Native** (default): [`SerialTransport`] drives a BLE UART bridge via the
//!   `serialport` crate
//!
//! ## Features
//!
//! - `native` (default): Serial bridge transport
//! - `http`: Download firmware images with `reqwest`
//! - `serde`: Serialization support for progress snapshots
//!
//! ## Example
//!
//! ```rust,no_run
//! use bleflash::{FileSource, SerialConfig, SerialTransport, Updater, link_channel};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (notifier, inbox) = link_channel();
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyACM0", 115200), notifier);
//!
//!     let mut updater = Updater::new(transport, inbox);
//!     let outcome = updater.update_from(&FileSource::new("firmware.bin"), |progress| {
//!         println!("{:?}: {}/{}", progress.step, progress.sent_bytes, progress.total_bytes);
//!     })?;
//!
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod protocol;
pub mod transport;
pub mod update;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Cooperative cancellation flag shared between an update run and its callers.
///
/// Cloning yields a handle to the same flag. A token also reports cancelled
/// while the global interrupt checker returns `true`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag
            .store(true, Ordering::SeqCst);
    }

    /// Clear a previous request so the token can be reused for a new run.
    pub fn reset(&self) {
        self.flag
            .store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested on this token or globally.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag
            .load(Ordering::SeqCst)
            || is_interrupted_requested()
    }
}

// Re-exports for convenience
#[cfg(feature = "http")]
pub use image::HttpSource;
#[cfg(feature = "native")]
pub use transport::serial::{PortInfo, SerialConfig, SerialTransport, list_ports};
pub use {
    error::{Error, Result},
    image::{ChunkPlanner, FLASH_PAGE_SIZE, FileSource, FirmwareImage, ImageSource},
    protocol::{
        ACK_MARKER, BOOTLOADER_MAGIC, Bl702Commands, CommandSet, MAX_PACKET_PAYLOAD, Packet,
        ResponseAwaiter, ResponseKind, fragment,
    },
    transport::{Inbox, LinkEvent, LinkNotifier, Transport, link_channel},
    update::{
        Machine, Outcome, Phase, PhaseEvent, UpdateConfig, UpdateProgress, UpdateStep, Updater,
    },
};
