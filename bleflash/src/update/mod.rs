//! Update orchestration.
//!
//! One attempt of an update run:
//!
//! 1. connect and send [`BOOTLOADER_MAGIC`]
//! 2. send the erase command (no response is expected)
//! 3. reconnect and wait for the device to come back
//! 4. send every flash page, waiting for one acknowledgement per page
//! 5. send the reset command
//!
//! A failed attempt restarts from step 1, up to [`UpdateConfig::max_attempts`]
//! retries. Cancellation is observed between packets and inside every wait.

pub mod progress;
pub mod state;

pub use progress::{Outcome, UpdateProgress, UpdateStep};
pub use state::{Machine, Phase, PhaseEvent};

use crate::CancelToken;
use crate::error::{Error, Result};
use crate::image::{ChunkPlanner, FirmwareImage, ImageSource};
use crate::protocol::response::{POLL_INTERVAL, RESPONSE_TIMEOUT};
use crate::protocol::{BOOTLOADER_MAGIC, Bl702Commands, CommandSet, ResponseAwaiter, ResponseKind, fragment};
use crate::transport::{Inbox, Transport};
use log::{debug, error, info, trace, warn};
use std::thread;
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const MAX_ATTEMPTS: usize = 10;

/// Default wait for the link after the erase.
pub const RECONNECT_SETTLE: Duration = Duration::from_millis(15000);

/// Default wait after the reset command.
pub const RESET_SETTLE: Duration = Duration::from_millis(100);

/// Default budget for one write confirmation.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tunables for an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Retries after the first attempt.
    pub max_attempts: usize,
    /// Budget for one page acknowledgement.
    pub response_timeout: Duration,
    /// Maximum time between cancellation checks.
    pub poll_interval: Duration,
    /// Wait between dropping and re-opening the link after the erase.
    pub reconnect_settle: Duration,
    /// Wait after the reset command.
    pub reset_settle: Duration,
    /// Budget for one write confirmation.
    pub write_timeout: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            response_timeout: RESPONSE_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            reconnect_settle: RECONNECT_SETTLE,
            reset_settle: RESET_SETTLE,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

impl UpdateConfig {
    /// Set the number of retries.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the settle time after the erase.
    #[must_use]
    pub fn with_reconnect_settle(mut self, settle: Duration) -> Self {
        self.reconnect_settle = settle;
        self
    }

    /// Set the settle time after the reset.
    #[must_use]
    pub fn with_reset_settle(mut self, settle: Duration) -> Self {
        self.reset_settle = settle;
        self
    }

    /// Set the write confirmation timeout.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Total number of attempts a run may make.
    pub fn total_attempts(&self) -> usize {
        self.max_attempts + 1
    }

    /// Reject budgets that can never be met.
    pub fn validate(&self) -> Result<()> {
        if self
            .response_timeout
            .is_zero()
        {
            return Err(Error::Config("response timeout must be non-zero".into()));
        }
        if self
            .write_timeout
            .is_zero()
        {
            return Err(Error::Config("write timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Drives firmware updates over one transport.
pub struct Updater<T: Transport, C: CommandSet = Bl702Commands> {
    transport: T,
    commands: C,
    awaiter: ResponseAwaiter,
    config: UpdateConfig,
    cancel: CancelToken,
}

impl<T: Transport> Updater<T> {
    /// Create an updater; `inbox` must be paired with the transport's notifier.
    pub fn new(transport: T, inbox: Inbox) -> Self {
        let cancel = CancelToken::new();
        Self {
            transport,
            commands: Bl702Commands,
            awaiter: ResponseAwaiter::new(inbox).with_cancel(cancel.clone()),
            config: UpdateConfig::default(),
            cancel,
        }
    }
}

impl<T: Transport, C: CommandSet> Updater<T, C> {
    /// Use a different command encoding.
    pub fn with_commands<D: CommandSet>(self, commands: D) -> Updater<T, D> {
        Updater {
            transport: self.transport,
            commands,
            awaiter: self.awaiter,
            config: self.config,
            cancel: self.cancel,
        }
    }

    /// Replace the tunables.
    #[must_use]
    pub fn with_config(mut self, config: UpdateConfig) -> Self {
        self.awaiter
            .set_poll_interval(config.poll_interval);
        self.config = config;
        self
    }

    /// Use `cancel` instead of the updater's own token, e.g. one shared with
    /// the transport.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.awaiter = self
            .awaiter
            .with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Current tunables.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Token that cancels the current run. Clones may be moved to other threads.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel
            .clone()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the updater, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Load an image from `source` and run an update with it.
    pub fn update_from<S, F>(&mut self, source: &S, observer: F) -> Result<Outcome>
    where
        S: ImageSource + ?Sized,
        F: FnMut(&UpdateProgress),
    {
        info!("Loading firmware from {}", source.describe());
        let image = source.load()?;
        self.run(&image, observer)
    }

    /// Run an update with `image`, publishing snapshots to `observer`.
    ///
    /// Returns [`Outcome::Complete`] or [`Outcome::Cancelled`]; a run whose
    /// attempts all fail ends with [`Error::AttemptsExhausted`] after a final
    /// snapshot carrying [`Outcome::Failed`].
    ///
    /// A cancellation requested before the call stops this run. The token is
    /// re-armed when the run ends, so the same updater can run again.
    pub fn run<F>(&mut self, image: &FirmwareImage, observer: F) -> Result<Outcome>
    where
        F: FnMut(&UpdateProgress),
    {
        let result = self.drive(image, observer);
        self.cancel
            .reset();
        result
    }

    fn drive<F>(&mut self, image: &FirmwareImage, mut observer: F) -> Result<Outcome>
    where
        F: FnMut(&UpdateProgress),
    {
        self.config
            .validate()?;
        if image.is_empty() {
            return Err(Error::ImageUnavailable("firmware image is empty".into()));
        }
        let erase = self
            .commands
            .erase_flash(image.total_bytes())?;

        let mut machine = Machine::new(
            self.config
                .max_attempts,
        );
        let mut planner = ChunkPlanner::new(image.clone());
        let mut progress = UpdateProgress::new(image.total_bytes());
        machine.apply(PhaseEvent::ImageLoaded)?;
        self.awaiter
            .clear();

        info!(
            "Updating firmware via {}: {} bytes in {} pages",
            self.transport
                .name(),
            image.total_bytes(),
            image.page_count()
        );

        loop {
            if self
                .cancel
                .is_cancelled()
            {
                return self.finish_cancelled(&mut machine, &mut progress, &mut observer);
            }

            machine.apply(PhaseEvent::AttemptStarted)?;
            let attempt = machine.attempt();
            info!(
                "Attempt {}/{}",
                attempt + 1,
                self.config
                    .total_attempts()
            );
            progress.begin_attempt(attempt);
            observer(&progress);

            match self.run_attempt(&mut machine, &mut planner, &erase, &mut progress, &mut observer) {
                Ok(()) => {
                    let outcome = Outcome::Complete {
                        attempts: attempt + 1,
                    };
                    progress.push_step(UpdateStep::Complete);
                    progress.finish(outcome);
                    observer(&progress);
                    info!("{outcome}");
                    return Ok(outcome);
                },
                Err(Error::Cancelled) => {
                    return self.finish_cancelled(&mut machine, &mut progress, &mut observer);
                },
                Err(e @ Error::Protocol(_)) => {
                    error!("Update stopped: {e}");
                    return Err(e);
                },
                Err(e) => {
                    warn!(
                        "Attempt {}/{} failed: {e}",
                        attempt + 1,
                        self.config
                            .total_attempts()
                    );
                    machine.apply(PhaseEvent::AttemptFailed)?;
                    if machine.is_exhausted() {
                        let attempts = attempt + 1;
                        progress.finish(Outcome::Failed { attempts });
                        observer(&progress);
                        error!("Update failed after {attempts} attempts");
                        return Err(Error::AttemptsExhausted { attempts });
                    }
                },
            }
        }
    }

    fn run_attempt<F>(
        &mut self,
        machine: &mut Machine,
        planner: &mut ChunkPlanner,
        erase: &[u8],
        progress: &mut UpdateProgress,
        observer: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&UpdateProgress),
    {
        self.transport
            .connect_if_needed()?;
        self.awaiter
            .forget_link_loss();

        publish_step(progress, observer, UpdateStep::EnteringBootloader);
        info!("Entering bootloader");
        self.write_confirmed(BOOTLOADER_MAGIC)?;
        machine.apply(PhaseEvent::BootloaderEntered)?;

        publish_step(progress, observer, UpdateStep::ErasingFlash);
        info!("Erasing flash ({} bytes)", planner.total_bytes());
        self.awaiter
            .clear();
        self.send_command(erase)?;
        machine.apply(PhaseEvent::EraseSent)?;

        publish_step(progress, observer, UpdateStep::Reconnecting);
        info!(
            "Reconnecting (settle {} ms)",
            self.config
                .reconnect_settle
                .as_millis()
        );
        self.transport
            .reconnect(
                self.config
                    .reconnect_settle,
            )?;
        self.awaiter
            .forget_link_loss();
        self.awaiter
            .clear();
        machine.apply(PhaseEvent::Reconnected)?;

        publish_step(progress, observer, UpdateStep::SendingFirmware);
        info!("Sending firmware");
        planner.reset();
        while let Some(page) = planner.next_page() {
            self.ensure_link()?;
            self.awaiter
                .clear();

            let command = self
                .commands
                .program_page(page.data)?;
            debug!(
                "Page {} at 0x{:06X}: {} bytes",
                page.index,
                page.offset,
                page.len()
            );
            self.send_command(&command)?;

            match self
                .awaiter
                .wait_once(
                    self.config
                        .response_timeout,
                ) {
                ResponseKind::Ok => {},
                ResponseKind::Nok => {
                    self.ensure_link()?;
                    return Err(Error::TransportNok(format!("page {} rejected", page.index)));
                },
                ResponseKind::TimedOut => {
                    return Err(Error::TransportTimeout(format!(
                        "no acknowledgement for page {} within {} ms",
                        page.index,
                        self.config
                            .response_timeout
                            .as_millis()
                    )));
                },
            }

            progress.sent_bytes = page.offset + page.len();
            observer(progress);
            machine.apply(PhaseEvent::PageAcked)?;
        }
        machine.apply(PhaseEvent::PagesDone)?;
        publish_step(progress, observer, UpdateStep::FirmwareSent);
        info!("Firmware sent");

        self.ensure_link()?;
        publish_step(progress, observer, UpdateStep::RestartingSystem);
        info!("Restarting system");
        let reset = self
            .commands
            .system_reset()?;
        match self.send_command(&reset) {
            Ok(()) | Err(Error::LinkLost(_)) => {},
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            // Every page is acknowledged; a device rebooting early may never confirm.
            Err(e) => warn!("Reset command not confirmed: {e}"),
        }
        thread::sleep(
            self.config
                .reset_settle,
        );
        machine.apply(PhaseEvent::ResetSent)?;
        Ok(())
    }

    /// Fail fast if the run was cancelled or the link dropped.
    fn ensure_link(&mut self) -> Result<()> {
        if self
            .cancel
            .is_cancelled()
        {
            return Err(Error::Cancelled);
        }
        if self
            .awaiter
            .link_lost()
        {
            warn!("Link lost unexpectedly");
            return Err(Error::LinkLost("transfer".into()));
        }
        Ok(())
    }

    /// Fragment `command` and write each packet, waiting for each delivery.
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        for packet in fragment(command) {
            trace!(
                "Packet: {} bytes, more={}",
                packet
                    .payload()
                    .len(),
                packet.has_more()
            );
            self.write_confirmed(packet.as_bytes())?;
        }
        Ok(())
    }

    fn write_confirmed(&mut self, data: &[u8]) -> Result<()> {
        if self
            .cancel
            .is_cancelled()
        {
            return Err(Error::Cancelled);
        }
        self.awaiter
            .prepare_write();
        self.transport
            .write_raw(data)?;
        self.awaiter
            .wait_delivered(
                self.config
                    .write_timeout,
            )
    }

    fn finish_cancelled<F>(
        &mut self,
        machine: &mut Machine,
        progress: &mut UpdateProgress,
        observer: &mut F,
    ) -> Result<Outcome>
    where
        F: FnMut(&UpdateProgress),
    {
        info!("Update cancelled");
        machine.apply(PhaseEvent::Cancel)?;
        self.awaiter
            .clear();
        *progress = UpdateProgress::new(progress.total_bytes);
        progress.attempt = machine.attempt();
        progress.finish(Outcome::Cancelled);
        observer(progress);
        Ok(Outcome::Cancelled)
    }
}

fn publish_step<F>(progress: &mut UpdateProgress, observer: &mut F, step: UpdateStep)
where
    F: FnMut(&UpdateProgress),
{
    progress.push_step(step);
    observer(progress);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpdateConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.total_attempts(), 11);
        assert_eq!(config.response_timeout, Duration::from_millis(3000));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.reconnect_settle, Duration::from_millis(15000));
        assert_eq!(config.reset_settle, Duration::from_millis(100));
        assert_eq!(config.write_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_config_builder() {
        let config = UpdateConfig::default()
            .with_max_attempts(2)
            .with_response_timeout(Duration::from_millis(50))
            .with_reconnect_settle(Duration::ZERO)
            .with_reset_settle(Duration::ZERO)
            .with_write_timeout(Duration::from_millis(20))
            .with_poll_interval(Duration::from_millis(1));

        assert_eq!(config.total_attempts(), 3);
        assert_eq!(config.response_timeout, Duration::from_millis(50));
        assert_eq!(config.reconnect_settle, Duration::ZERO);
        assert_eq!(config.write_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_config_validate() {
        assert!(UpdateConfig::default().validate().is_ok());
        assert!(matches!(
            UpdateConfig::default()
                .with_response_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            UpdateConfig::default()
                .with_write_timeout(Duration::ZERO)
                .validate(),
            Err(Error::Config(_))
        ));
    }
}
