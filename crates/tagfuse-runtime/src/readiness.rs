//! Go/no-go aggregation for the optimize-and-publish step.
//!
//! Readiness is `has_initial_guess && every camera ready`.  The initial
//! guess flag is raised by an applied pose prior and dropped by every new
//! marker layout, since factors interpreted against the old layout no longer
//! hold.
//!
//! A layout change that is never followed by a fresh prior leaves the system
//! not-ready indefinitely.  That state is reported, once per layout change,
//! rather than recovered from automatically.

use std::fmt;

use tracing::warn;

/// Why a tick may or may not optimize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub has_initial_guess: bool,
    /// The initial guess was lost to a layout change and no prior has
    /// arrived since.
    pub awaiting_prior_after_layout: bool,
    /// Names of cameras that reported not ready this tick.
    pub cameras_not_ready: Vec<String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.has_initial_guess && self.cameras_not_ready.is_empty()
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ready() {
            return write!(f, "ready");
        }
        let mut reasons = Vec::new();
        if !self.has_initial_guess {
            reasons.push(if self.awaiting_prior_after_layout {
                "pose prior (tag layout changed)".to_string()
            } else {
                "pose prior".to_string()
            });
        }
        if !self.cameras_not_ready.is_empty() {
            reasons.push(format!("camera(s) {}", self.cameras_not_ready.join(", ")));
        }
        write!(f, "waiting for {}", reasons.join("; "))
    }
}

/// Initial-guess state machine.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    has_initial_guess: bool,
    awaiting_prior_after_layout: bool,
    layout_warning_emitted: bool,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_initial_guess(&self) -> bool {
        self.has_initial_guess
    }

    pub fn awaiting_prior_after_layout(&self) -> bool {
        self.awaiting_prior_after_layout
    }

    /// A pose prior was applied to the estimator.
    pub fn prior_applied(&mut self) {
        self.has_initial_guess = true;
        self.awaiting_prior_after_layout = false;
        self.layout_warning_emitted = false;
    }

    /// A new marker layout was installed.
    pub fn layout_installed(&mut self) {
        self.has_initial_guess = false;
        self.awaiting_prior_after_layout = true;
        self.layout_warning_emitted = false;
    }

    /// Combine the initial-guess flag with this tick's camera reports.
    pub fn assess(&mut self, cameras_not_ready: Vec<String>) -> Readiness {
        if self.awaiting_prior_after_layout && !self.layout_warning_emitted {
            warn!(
                "tag layout changed and no pose prior has arrived since; \
                 the estimator stays paused until a new prior is published"
            );
            self.layout_warning_emitted = true;
        }
        Readiness {
            has_initial_guess: self.has_initial_guess,
            awaiting_prior_after_layout: self.awaiting_prior_after_layout,
            cameras_not_ready,
        }
    }
}
