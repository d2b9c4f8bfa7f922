//! Update state machine.
//!
//! ```text
//! Idle -> ImageLoaded -> EnteringBootloader -> ErasingFlash -> Reconnecting
//!                              ^                                    |
//!                              |                                    v
//!                       Failed { attempt } <-------------- TransferringPages
//!                          (retry while                             |
//!                       attempt < max)                              v
//!                                                SystemReset -> Complete
//!
//! Any non-terminal phase --Cancel--> Aborted
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Phase of an update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing loaded yet.
    Idle,
    /// Image in memory, no attempt started.
    ImageLoaded,
    /// Sending the bootloader magic.
    EnteringBootloader,
    /// Sending the erase command.
    ErasingFlash,
    /// Waiting for the link to come back after the erase.
    Reconnecting,
    /// Programming pages.
    TransferringPages,
    /// Sending the reset command.
    SystemReset,
    /// Update finished.
    Complete,
    /// The numbered attempt failed.
    Failed {
        /// Zero-based attempt number.
        attempt: usize,
    },
    /// Cancelled by the caller.
    Aborted,
}

impl Phase {
    /// Whether this phase belongs to a running attempt.
    pub fn is_in_attempt(self) -> bool {
        matches!(
            self,
            Self::EnteringBootloader
                | Self::ErasingFlash
                | Self::Reconnecting
                | Self::TransferringPages
                | Self::SystemReset
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ImageLoaded => write!(f, "image loaded"),
            Self::EnteringBootloader => write!(f, "entering bootloader"),
            Self::ErasingFlash => write!(f, "erasing flash"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::TransferringPages => write!(f, "transferring pages"),
            Self::SystemReset => write!(f, "system reset"),
            Self::Complete => write!(f, "complete"),
            Self::Failed { attempt } => write!(f, "failed (attempt {})", attempt + 1),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// The image was loaded.
    ImageLoaded,
    /// A new attempt begins.
    AttemptStarted,
    /// Bootloader magic delivered.
    BootloaderEntered,
    /// Erase command delivered.
    EraseSent,
    /// Link re-established after the erase.
    Reconnected,
    /// One page acknowledged.
    PageAcked,
    /// Every page acknowledged.
    PagesDone,
    /// Reset command sent.
    ResetSent,
    /// The current attempt failed.
    AttemptFailed,
    /// The caller asked to stop.
    Cancel,
}

/// Phase plus attempt bookkeeping.
#[derive(Debug, Clone)]
pub struct Machine {
    phase: Phase,
    attempt: usize,
    max_attempts: usize,
}

impl Machine {
    /// Create a machine allowing retries up to attempt number `max_attempts`.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            phase: Phase::Idle,
            attempt: 0,
            max_attempts,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Zero-based number of the current (or last) attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Whether the run failed and no retries remain.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.phase, Phase::Failed { attempt } if attempt >= self.max_attempts)
    }

    /// Whether the run reached a phase it can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Complete | Phase::Aborted) || self.is_exhausted()
    }

    /// Compute the successor of `phase` for `event`, without applying it.
    pub fn next(&self, event: PhaseEvent) -> Option<(Phase, usize)> {
        use {Phase as P, PhaseEvent as E};

        let attempt = self.attempt;
        let next = match (self.phase, event) {
            (P::Idle, E::ImageLoaded) => P::ImageLoaded,
            (P::ImageLoaded, E::AttemptStarted) => return Some((P::EnteringBootloader, 0)),
            (P::Failed { attempt }, E::AttemptStarted) if attempt < self.max_attempts => {
                return Some((P::EnteringBootloader, attempt + 1));
            },
            (P::EnteringBootloader, E::BootloaderEntered) => P::ErasingFlash,
            (P::ErasingFlash, E::EraseSent) => P::Reconnecting,
            (P::Reconnecting, E::Reconnected) => P::TransferringPages,
            (P::TransferringPages, E::PageAcked) => P::TransferringPages,
            (P::TransferringPages, E::PagesDone) => P::SystemReset,
            (P::SystemReset, E::ResetSent) => P::Complete,
            (phase, E::AttemptFailed) if phase.is_in_attempt() => P::Failed { attempt },
            (phase, E::Cancel) if !matches!(phase, P::Complete | P::Aborted) => P::Aborted,
            _ => return None,
        };
        Some((next, attempt))
    }

    /// Apply `event`, rejecting transitions the protocol does not allow.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<Phase> {
        let (phase, attempt) = self
            .next(event)
            .ok_or_else(|| {
                Error::Protocol(format!("{event:?} is not valid while {}", self.phase))
            })?;
        self.phase = phase;
        self.attempt = attempt;
        Ok(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_pages(machine: &mut Machine) {
        for event in [
            PhaseEvent::AttemptStarted,
            PhaseEvent::BootloaderEntered,
            PhaseEvent::EraseSent,
            PhaseEvent::Reconnected,
        ] {
            machine
                .apply(event)
                .unwrap();
        }
    }

    #[test]
    fn test_happy_path() {
        let mut machine = Machine::new(10);
        assert_eq!(machine.phase(), Phase::Idle);
        machine
            .apply(PhaseEvent::ImageLoaded)
            .unwrap();
        run_to_pages(&mut machine);
        assert_eq!(machine.phase(), Phase::TransferringPages);

        machine
            .apply(PhaseEvent::PageAcked)
            .unwrap();
        machine
            .apply(PhaseEvent::PageAcked)
            .unwrap();
        machine
            .apply(PhaseEvent::PagesDone)
            .unwrap();
        assert_eq!(
            machine
                .apply(PhaseEvent::ResetSent)
                .unwrap(),
            Phase::Complete
        );
        assert!(machine.is_terminal());
        assert_eq!(machine.attempt(), 0);
    }

    #[test]
    fn test_retry_boundary() {
        let mut machine = Machine::new(2);
        machine
            .apply(PhaseEvent::ImageLoaded)
            .unwrap();

        for expected in 0..=2 {
            machine
                .apply(PhaseEvent::AttemptStarted)
                .unwrap();
            assert_eq!(machine.attempt(), expected);
            machine
                .apply(PhaseEvent::AttemptFailed)
                .unwrap();
            assert_eq!(machine.phase(), Phase::Failed { attempt: expected });
        }

        assert!(machine.is_exhausted());
        assert!(
            machine
                .apply(PhaseEvent::AttemptStarted)
                .is_err()
        );
    }

    #[test]
    fn test_failure_from_any_attempt_phase() {
        let steps = [
            PhaseEvent::BootloaderEntered,
            PhaseEvent::EraseSent,
            PhaseEvent::Reconnected,
            PhaseEvent::PagesDone,
        ];
        for fail_after in 0..=steps.len() {
            let mut machine = Machine::new(10);
            machine
                .apply(PhaseEvent::ImageLoaded)
                .unwrap();
            machine
                .apply(PhaseEvent::AttemptStarted)
                .unwrap();
            for event in &steps[..fail_after] {
                machine
                    .apply(*event)
                    .unwrap();
            }
            assert_eq!(
                machine
                    .apply(PhaseEvent::AttemptFailed)
                    .unwrap(),
                Phase::Failed { attempt: 0 }
            );
        }
    }

    #[test]
    fn test_cancel_from_transfer() {
        let mut machine = Machine::new(10);
        machine
            .apply(PhaseEvent::ImageLoaded)
            .unwrap();
        run_to_pages(&mut machine);

        assert_eq!(
            machine
                .apply(PhaseEvent::Cancel)
                .unwrap(),
            Phase::Aborted
        );
        assert!(machine.is_terminal());
        assert!(
            machine
                .apply(PhaseEvent::Cancel)
                .is_err()
        );
        assert!(
            machine
                .apply(PhaseEvent::AttemptStarted)
                .is_err()
        );
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut machine = Machine::new(10);
        assert!(
            machine
                .apply(PhaseEvent::AttemptStarted)
                .is_err()
        );
        machine
            .apply(PhaseEvent::ImageLoaded)
            .unwrap();
        assert!(
            machine
                .apply(PhaseEvent::PageAcked)
                .is_err()
        );
        assert!(
            machine
                .apply(PhaseEvent::AttemptFailed)
                .is_err()
        );
        machine
            .apply(PhaseEvent::AttemptStarted)
            .unwrap();
        assert!(
            machine
                .apply(PhaseEvent::ResetSent)
                .is_err()
        );
        assert_eq!(machine.phase(), Phase::EnteringBootloader);
    }
}
