//! Transport abstraction.
//!
//! The updater drives the link through [`Transport`] and learns about
//! asynchronous link activity through a channel:
//!
//! ```text
//! +------------------+   write_raw / reconnect   +------------------+
//! |     Updater      | ------------------------> |    Transport     |
//! | (ResponseAwaiter)|                           | (BLE, serial...) |
//! +--------+---------+                           +--------+---------+
//!          ^                                              |
//!          |        Inbox  <----- mpsc -----  LinkNotifier|
//!          +----------------------------------------------+
//! ```
//!
//! The transport's callback path only ever sends [`LinkEvent`]s; all state
//! derived from them lives in the [`Inbox`], which has a single owner.

#[cfg(feature = "native")]
pub mod serial;

use crate::error::{Error, Result};
use log::trace;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep inside [`settle`].
pub const SETTLE_SLICE: Duration = Duration::from_millis(10);

/// Sleep for `duration` in short slices, stopping early once `is_cancelled`
/// returns `true`.
///
/// Transports use this for their reconnect settle time so a cancellation does
/// not have to wait out the whole delay.
pub fn settle(duration: Duration, is_cancelled: impl Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + duration;
    loop {
        if is_cancelled() {
            return Err(Error::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(SETTLE_SLICE));
    }
}

/// Outbound side of a device link.
pub trait Transport: Send {
    /// Connect unless already connected. Blocks until the link is usable.
    fn connect_if_needed(&mut self) -> Result<()>;

    /// Drop the link, wait `settle`, and connect again.
    fn reconnect(&mut self, settle: Duration) -> Result<()>;

    /// Queue one raw write.
    ///
    /// Completion is reported later through [`LinkNotifier::write_delivered`].
    fn write_raw(&mut self, data: &[u8]) -> Result<()>;

    /// Link name for log messages.
    fn name(&self) -> &str {
        "link"
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect_if_needed(&mut self) -> Result<()> {
        (**self).connect_if_needed()
    }

    fn reconnect(&mut self, settle: Duration) -> Result<()> {
        (**self).reconnect(settle)
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_raw(data)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Asynchronous notification from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The last raw write reached the device.
    WriteDelivered,
    /// The device sent one response frame.
    Response(Vec<u8>),
    /// The link dropped.
    Disconnected {
        /// Whether the user asked for the disconnect.
        user_initiated: bool,
    },
}

/// Sending half handed to the transport's callback path.
#[derive(Debug, Clone)]
pub struct LinkNotifier {
    tx: Sender<LinkEvent>,
}

impl LinkNotifier {
    /// Report that the last write was delivered.
    pub fn write_delivered(&self) {
        self.send(LinkEvent::WriteDelivered);
    }

    /// Push one response frame.
    pub fn response(&self, frame: impl Into<Vec<u8>>) {
        self.send(LinkEvent::Response(frame.into()));
    }

    /// Report a disconnect.
    pub fn disconnected(&self, user_initiated: bool) {
        self.send(LinkEvent::Disconnected { user_initiated });
    }

    /// Send a raw event.
    pub fn send(&self, event: LinkEvent) {
        // The inbox is gone once the updater is dropped; nothing left to tell.
        let _ = self
            .tx
            .send(event);
    }
}

/// Receiving half: buffered link state, owned by one consumer.
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<LinkEvent>,
    frames: VecDeque<Vec<u8>>,
    delivered: bool,
    link_lost: bool,
    user_disconnect: bool,
    closed: bool,
}

/// Create a connected notifier/inbox pair.
pub fn link_channel() -> (LinkNotifier, Inbox) {
    let (tx, rx) = mpsc::channel();
    (
        LinkNotifier { tx },
        Inbox {
            rx,
            frames: VecDeque::new(),
            delivered: false,
            link_lost: false,
            user_disconnect: false,
            closed: false,
        },
    )
}

impl Inbox {
    fn apply(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::WriteDelivered => self.delivered = true,
            LinkEvent::Response(frame) => {
                trace!("Queued response frame: {frame:02X?}");
                self.frames
                    .push_back(frame);
            },
            LinkEvent::Disconnected { user_initiated } => {
                self.frames
                    .clear();
                if user_initiated {
                    self.user_disconnect = true;
                } else {
                    self.link_lost = true;
                }
            },
        }
    }

    /// Apply every event already waiting in the channel.
    pub fn drain(&mut self) {
        loop {
            match self
                .rx
                .try_recv()
            {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return;
                },
            }
        }
    }

    /// Block up to `wait` for the next event, then drain the rest.
    ///
    /// Returns `true` if at least one event arrived.
    pub fn poll(&mut self, wait: Duration) -> bool {
        if self.closed {
            thread::sleep(wait);
            return false;
        }

        match self
            .rx
            .recv_timeout(wait)
        {
            Ok(event) => {
                self.apply(event);
                self.drain();
                true
            },
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                false
            },
        }
    }

    /// Pop the oldest buffered response frame.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        self.frames
            .pop_front()
    }

    /// Number of buffered response frames.
    pub fn pending_frames(&self) -> usize {
        self.frames
            .len()
    }

    /// Discard buffered response frames.
    pub fn clear_frames(&mut self) {
        self.frames
            .clear();
    }

    /// Consume a pending delivery confirmation.
    pub fn take_delivered(&mut self) -> bool {
        std::mem::take(&mut self.delivered)
    }

    /// Forget any stale delivery confirmation.
    pub fn reset_delivered(&mut self) {
        self.delivered = false;
    }

    /// Whether an unexpected disconnect was seen since the last
    /// [`Inbox::clear_link_lost`].
    pub fn link_lost(&self) -> bool {
        self.link_lost
    }

    /// Forget an unexpected disconnect.
    pub fn clear_link_lost(&mut self) {
        self.link_lost = false;
    }

    /// Consume a pending user-initiated disconnect.
    pub fn take_user_disconnect(&mut self) -> bool {
        std::mem::take(&mut self.user_disconnect)
    }

    /// Whether every notifier has been dropped.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
