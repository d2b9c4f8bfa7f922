//! Progress snapshots published to observers.

use std::fmt;

/// User-facing step of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UpdateStep {
    /// Switching the device into its bootloader.
    EnteringBootloader,
    /// Erasing flash.
    ErasingFlash,
    /// Waiting for the link to come back.
    Reconnecting,
    /// Programming pages.
    SendingFirmware,
    /// Every page acknowledged.
    FirmwareSent,
    /// Restarting into the new image.
    RestartingSystem,
    /// Update finished.
    Complete,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EnteringBootloader => "Entering bootloader",
            Self::ErasingFlash => "Erasing flash",
            Self::Reconnecting => "Reconnecting",
            Self::SendingFirmware => "Sending firmware",
            Self::FirmwareSent => "Firmware sent",
            Self::RestartingSystem => "Restarting system",
            Self::Complete => "Complete",
        };
        f.write_str(s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "result", rename_all = "snake_case"))]
pub enum Outcome {
    /// The device runs the new image.
    Complete {
        /// Attempts used, including the successful one.
        attempts: usize,
    },
    /// Every attempt failed.
    Failed {
        /// Attempts made.
        attempts: usize,
    },
    /// Stopped by the caller.
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete { attempts: 1 } => write!(f, "Update complete"),
            Self::Complete { attempts } => write!(f, "Update complete after {attempts} attempts"),
            Self::Failed { attempts } => write!(f, "Update failed after {attempts} attempts"),
            Self::Cancelled => write!(f, "Update cancelled"),
        }
    }
}

/// Read-only snapshot of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpdateProgress {
    /// Image size in bytes.
    pub total_bytes: usize,
    /// Bytes acknowledged in the current attempt.
    pub sent_bytes: usize,
    /// Latest step.
    pub step: Option<UpdateStep>,
    /// Steps reached in the current attempt, in order.
    pub steps: Vec<UpdateStep>,
    /// Zero-based attempt number.
    pub attempt: usize,
    /// Whether a run is in progress.
    pub is_updating: bool,
    /// Set on the final snapshot of a run.
    pub outcome: Option<Outcome>,
}

impl UpdateProgress {
    /// Idle snapshot for an image of `total_bytes`.
    pub fn new(total_bytes: usize) -> Self {
        Self {
            total_bytes,
            ..Self::default()
        }
    }

    /// Transfer progress in percent.
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.sent_bytes as f64 * 100.0 / self.total_bytes as f64
    }

    pub(crate) fn begin_attempt(&mut self, attempt: usize) {
        self.attempt = attempt;
        self.sent_bytes = 0;
        self.step = None;
        self.steps
            .clear();
        self.is_updating = true;
        self.outcome = None;
    }

    pub(crate) fn push_step(&mut self, step: UpdateStep) {
        self.step = Some(step);
        self.steps
            .push(step);
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        self.is_updating = false;
        self.outcome = Some(outcome);
    }
}
