//! Device acknowledgements and the waits that collect them.
//!
//! The bootloader answers every page with a two byte frame. A positive answer
//! starts with [`ACK_MARKER`] (`'O'`, as in `"OK"`); anything else is a
//! rejection.
//!
//! All waits of an update run go through one [`ResponseAwaiter`]. It owns the
//! [`Inbox`] and every wait borrows it mutably, so at most one wait can be
//! outstanding at a time.

use crate::CancelToken;
use crate::error::{Error, Result};
use crate::transport::Inbox;
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// First byte of a positive response.
pub const ACK_MARKER: u8 = 0x4F;

/// Length of every well-formed response.
pub const RESPONSE_LEN: usize = 2;

/// Default budget for one response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default interval between inbox polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of waiting for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Positive acknowledgement.
    Ok,
    /// Rejected, malformed, or the wait was cancelled.
    Nok,
    /// Nothing arrived within the budget.
    TimedOut,
}

impl ResponseKind {
    /// Classify one response frame.
    pub fn classify(frame: &[u8]) -> Self {
        match frame {
            [ACK_MARKER, _] => Self::Ok,
            _ => Self::Nok,
        }
    }
}

/// Sequential waits on the link.
#[derive(Debug)]
pub struct ResponseAwaiter {
    inbox: Inbox,
    cancel: CancelToken,
    poll_interval: Duration,
}

impl ResponseAwaiter {
    /// Create an awaiter over `inbox`.
    pub fn new(inbox: Inbox) -> Self {
        Self {
            inbox,
            cancel: CancelToken::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Use `cancel` to abort waits.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the maximum time between cancellation checks.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.set_poll_interval(interval);
        self
    }

    /// In-place variant of [`ResponseAwaiter::with_poll_interval`].
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval.max(Duration::from_millis(1));
    }

    /// Token that aborts waits.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Read-only view of the buffered link state.
    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    fn pump(&mut self, wait: Duration) {
        self.inbox
            .poll(wait);
        self.note_user_disconnect();
    }

    fn note_user_disconnect(&mut self) {
        if self
            .inbox
            .take_user_disconnect()
        {
            debug!("User-initiated disconnect, cancelling");
            self.cancel
                .cancel();
        }
    }

    /// Apply pending events without blocking.
    pub fn refresh(&mut self) {
        self.inbox
            .drain();
        self.note_user_disconnect();
    }

    /// Drop buffered response frames.
    pub fn clear(&mut self) {
        self.refresh();
        self.inbox
            .clear_frames();
    }

    /// Whether the link dropped unexpectedly since the last
    /// [`ResponseAwaiter::forget_link_loss`].
    pub fn link_lost(&mut self) -> bool {
        self.refresh();
        self.inbox
            .link_lost()
    }

    /// Forget an unexpected disconnect, e.g. one caused by our own reconnect.
    pub fn forget_link_loss(&mut self) {
        self.refresh();
        self.inbox
            .clear_link_lost();
    }

    /// Arm the delivery flag before a raw write.
    pub fn prepare_write(&mut self) {
        self.refresh();
        self.inbox
            .reset_delivered();
    }

    /// Block until the last write is confirmed.
    pub fn wait_delivered(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self
                .inbox
                .take_delivered()
            {
                return Ok(());
            }
            if self
                .cancel
                .is_cancelled()
            {
                return Err(Error::Cancelled);
            }
            if self
                .inbox
                .link_lost()
            {
                return Err(Error::LinkLost("write".into()));
            }
            if self
                .inbox
                .is_closed()
            {
                return Err(Error::Transport("link closed".into()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TransportTimeout(format!(
                    "write not delivered within {} ms",
                    timeout.as_millis()
                )));
            }
            self.pump(
                (deadline - now).min(self.poll_interval),
            );
        }
    }

    /// Wait for exactly one response frame.
    ///
    /// Frames that arrived earlier are consumed first. Cancellation, a lost
    /// link, or a closed channel end the wait with [`ResponseKind::Nok`]. A
    /// timeout leaves the queue untouched.
    pub fn wait_once(&mut self, timeout: Duration) -> ResponseKind {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self
                .inbox
                .pop_frame()
            {
                let kind = ResponseKind::classify(&frame);
                match kind {
                    ResponseKind::Ok => trace!("Response {frame:02X?}: OK"),
                    _ if frame.len() != RESPONSE_LEN => warn!(
                        "Malformed response ({} bytes): {frame:02X?}",
                        frame.len()
                    ),
                    _ => warn!("Negative response: {frame:02X?}"),
                }
                return kind;
            }
            if self
                .cancel
                .is_cancelled()
            {
                debug!("Response wait cancelled");
                return ResponseKind::Nok;
            }
            if self
                .inbox
                .link_lost()
            {
                debug!("Response wait aborted: link lost");
                return ResponseKind::Nok;
            }
            if self
                .inbox
                .is_closed()
            {
                debug!("Response wait aborted: link closed");
                return ResponseKind::Nok;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "No response within {} ms",
                    timeout.as_millis()
                );
                return ResponseKind::TimedOut;
            }
            self.pump(
                (deadline - now).min(self.poll_interval),
            );
        }
    }
}
