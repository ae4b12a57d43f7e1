//! [`Localizer`] – reference [`PoseEstimator`] implementation.
//!
//! Keeps a bounded history of factors behind an *anchor* (the prior, or a
//! marginalised state) and re-solves the whole window on every
//! [`optimize`](PoseEstimator::optimize) with a sequential fusion pass in
//! timestamp order:
//!
//! - **Odometry** composes the increment onto the running pose and inflates
//!   the variance by the increment's noise.
//! - **Vision** blends the running pose towards the measured pose with an
//!   inverse-variance gain, per component:
//!
//! ```text
//! k = σ²_state / (σ²_state + σ²_meas)
//! translation = lerp(translation, measured, k)
//! rotation    = slerp(rotation, measured, k)
//! σ²_state    = (1 − k) · σ²_state
//! ```
//!
//! Re-solving from the anchor means factors that arrive out of order (a late
//! camera frame) are still folded in at the right place in time.  Factors
//! older than `history_window_us` behind the newest factor are folded into a
//! new anchor after each successful solve, and also on insert once the
//! window spans twice that, so it stays bounded while nothing optimizes.

use std::fmt::Write as _;

use tagfuse_types::{
    EstimationError, MarkerLayout, OdometrySample, PoseEstimate, PoseUncertainty, Timestamp,
    Transform3D, VisionObservation,
};
use tracing::{debug, warn};

use crate::estimator::PoseEstimator;
use crate::vision::{PoseMeasurement, robot_pose_measurements};

/// Default length of the re-solved factor window (10 s).
pub const DEFAULT_HISTORY_WINDOW_US: u64 = 10_000_000;

/// Tuning for [`Localizer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizerConfig {
    /// Factors older than this (relative to the newest factor) are folded
    /// into the anchor after a successful solve, or on insert once the
    /// window spans twice this.
    pub history_window_us: u64,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            history_window_us: DEFAULT_HISTORY_WINDOW_US,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct State {
    timestamp: Timestamp,
    pose: Transform3D,
    translation_var: f64,
    rotation_var: f64,
}

#[derive(Debug, Clone)]
enum Factor {
    Odometry(OdometrySample),
    Vision(PoseMeasurement),
}

impl Factor {
    fn timestamp(&self) -> Timestamp {
        match self {
            Factor::Odometry(s) => s.timestamp,
            Factor::Vision(m) => m.timestamp,
        }
    }

    fn validate(&self) -> Result<(), EstimationError> {
        let (finite, t_sigma, r_sigma, what) = match self {
            Factor::Odometry(s) => (
                s.delta.is_finite(),
                s.translation_sigma,
                s.rotation_sigma,
                "odometry",
            ),
            Factor::Vision(m) => (
                m.world_to_robot.is_finite(),
                m.translation_sigma,
                m.rotation_sigma,
                "vision",
            ),
        };
        if !finite {
            return Err(EstimationError::InvalidFactor {
                reason: format!("{what} factor at {} is not finite", self.timestamp()),
            });
        }
        if !(t_sigma.is_finite() && r_sigma.is_finite() && t_sigma > 0.0 && r_sigma > 0.0) {
            return Err(EstimationError::InvalidFactor {
                reason: format!(
                    "{what} factor at {} has non-positive noise ({t_sigma}, {r_sigma})",
                    self.timestamp()
                ),
            });
        }
        Ok(())
    }
}

/// Sequential-fusion pose estimator over a sliding factor window.
#[derive(Debug)]
pub struct Localizer {
    config: LocalizerConfig,
    anchor: Option<State>,
    prior_uncertainty: Option<PoseUncertainty>,
    factors: Vec<Factor>,
    /// Oldest and newest factor timestamps in the window.
    span: Option<(Timestamp, Timestamp)>,
    estimate: Option<PoseEstimate>,
    sequence: u64,
    odometry_total: usize,
    vision_total: usize,
    stale_dropped: u64,
}

impl Default for Localizer {
    fn default() -> Self {
        Self::new(LocalizerConfig::default())
    }
}

impl Localizer {
    pub fn new(config: LocalizerConfig) -> Self {
        Self {
            config,
            anchor: None,
            prior_uncertainty: None,
            factors: Vec::new(),
            span: None,
            estimate: None,
            sequence: 0,
            odometry_total: 0,
            vision_total: 0,
            stale_dropped: 0,
        }
    }

    /// Factors currently inside the re-solved window.
    pub fn window_len(&self) -> usize {
        self.factors.len()
    }

    /// Factors rejected because they were older than the anchor.
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    fn is_stale(&self, timestamp: Timestamp) -> bool {
        self.anchor.is_some_and(|a| timestamp < a.timestamp)
    }

    fn push(&mut self, factor: Factor) {
        if self.is_stale(factor.timestamp()) {
            self.stale_dropped += 1;
            warn!(
                timestamp = %factor.timestamp(),
                "factor older than the estimator anchor; dropped"
            );
            return;
        }
        let t = factor.timestamp();
        self.span = Some(match self.span {
            Some((oldest, newest)) => (oldest.min(t), newest.max(t)),
            None => (t, t),
        });
        self.factors.push(factor);

        if let Some((oldest, newest)) = self.span
            && newest.as_micros() - oldest.as_micros()
                > self.config.history_window_us.saturating_mul(2)
        {
            self.compact();
        }
    }

    /// Bound the window without a full optimize.
    fn compact(&mut self) {
        let Some(anchor) = self.anchor else {
            // No state to fold into before the first prior.
            let Some((_, newest)) = self.span else {
                return;
            };
            let cutoff = newest.as_micros().saturating_sub(self.config.history_window_us);
            let before = self.factors.len();
            self.factors.retain(|f| f.timestamp().as_micros() > cutoff);
            debug!(
                discarded = before - self.factors.len(),
                "factors ahead of any prior discarded"
            );
            self.recompute_span();
            return;
        };
        match self.solve(anchor) {
            Ok((order, states)) => self.marginalize(&order, &states),
            Err(e) => {
                let Some((_, newest)) = self.span else {
                    return;
                };
                let cutoff = newest.as_micros().saturating_sub(self.config.history_window_us);
                let before = self.factors.len();
                self.factors.retain(|f| f.timestamp().as_micros() > cutoff);
                warn!(
                    error = %e,
                    discarded = before - self.factors.len(),
                    "factor window could not be folded; old factors discarded"
                );
                self.recompute_span();
            }
        }
    }

    fn recompute_span(&mut self) {
        self.span = self.factors.iter().map(Factor::timestamp).fold(None, |span, t| {
            Some(match span {
                Some((oldest, newest)) => (t.min(oldest), t.max(newest)),
                None => (t, t),
            })
        });
    }

    /// Fold the window into a sequence of states, one per factor, in
    /// timestamp order (ties keep insertion order).
    fn solve(&self, anchor: State) -> Result<(Vec<usize>, Vec<State>), EstimationError> {
        let mut order: Vec<usize> = (0..self.factors.len()).collect();
        order.sort_by_key(|&i| self.factors[i].timestamp());

        let mut state = anchor;
        let mut states = Vec::with_capacity(order.len());
        for &i in &order {
            let factor = &self.factors[i];
            factor.validate()?;
            match factor {
                Factor::Odometry(s) => {
                    state.pose = state.pose.compose(s.delta);
                    state.translation_var += s.translation_sigma * s.translation_sigma;
                    state.rotation_var += s.rotation_sigma * s.rotation_sigma;
                }
                Factor::Vision(m) => {
                    let meas_t = m.translation_sigma * m.translation_sigma;
                    let meas_r = m.rotation_sigma * m.rotation_sigma;
                    let k_t = state.translation_var / (state.translation_var + meas_t);
                    let k_r = state.rotation_var / (state.rotation_var + meas_r);
                    state.pose = Transform3D::new(
                        state.pose.translation.lerp(m.world_to_robot.translation, k_t),
                        state.pose.rotation.slerp(m.world_to_robot.rotation, k_r),
                    );
                    state.translation_var *= 1.0 - k_t;
                    state.rotation_var *= 1.0 - k_r;
                }
            }
            state.timestamp = state.timestamp.max(factor.timestamp());
            if !(state.pose.is_finite()
                && state.translation_var.is_finite()
                && state.rotation_var.is_finite())
            {
                return Err(EstimationError::Diverged {
                    reason: format!("state became non-finite at {}", state.timestamp),
                });
            }
            states.push(state);
        }
        Ok((order, states))
    }

    /// Move the anchor forward past every factor older than the window.
    fn marginalize(&mut self, order: &[usize], states: &[State]) {
        let Some(newest) = states.last().map(|s| s.timestamp) else {
            return;
        };
        let cutoff = newest.as_micros().saturating_sub(self.config.history_window_us);
        let Some(last_old) = order
            .iter()
            .rposition(|&i| self.factors[i].timestamp().as_micros() <= cutoff)
        else {
            return;
        };
        let mut keep = vec![true; self.factors.len()];
        for &i in &order[..=last_old] {
            keep[i] = false;
        }
        let mut idx = 0;
        self.factors.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        self.anchor = Some(states[last_old]);
        self.recompute_span();
        debug!(
            folded = last_old + 1,
            remaining = self.factors.len(),
            anchor = %states[last_old].timestamp,
            "factor window marginalised"
        );
    }
}

impl PoseEstimator for Localizer {
    fn reset(&mut self, pose: Transform3D, uncertainty: PoseUncertainty, timestamp: Timestamp) {
        self.anchor = Some(State {
            timestamp,
            pose,
            translation_var: uncertainty.translation_sigma * uncertainty.translation_sigma,
            rotation_var: uncertainty.rotation_sigma * uncertainty.rotation_sigma,
        });
        self.prior_uncertainty = Some(uncertainty);
        self.factors.clear();
        self.span = None;
        self.estimate = None;
        self.sequence = 0;
        self.odometry_total = 0;
        self.vision_total = 0;
        self.stale_dropped = 0;
    }

    fn add_odometry(&mut self, sample: &OdometrySample) {
        self.odometry_total += 1;
        self.push(Factor::Odometry(sample.clone()));
    }

    fn add_tag_observation(&mut self, observation: &VisionObservation, layout: &MarkerLayout) {
        for measurement in robot_pose_measurements(observation, layout) {
            self.vision_total += 1;
            self.push(Factor::Vision(measurement));
        }
    }

    fn optimize(&mut self) -> Result<(), EstimationError> {
        let anchor = self.anchor.ok_or(EstimationError::NotInitialized)?;
        if let Some(u) = self.prior_uncertainty
            && !u.is_valid()
        {
            return Err(EstimationError::InvalidFactor {
                reason: format!("prior uncertainty is not positive: {u:?}"),
            });
        }

        let (order, states) = self.solve(anchor)?;
        let solution = states.last().copied().unwrap_or(anchor);

        self.sequence += 1;
        self.estimate = Some(PoseEstimate {
            timestamp: solution.timestamp,
            pose: solution.pose,
            uncertainty: PoseUncertainty::new(
                solution.translation_var.sqrt(),
                solution.rotation_var.sqrt(),
            ),
            odometry_factors: self.odometry_total,
            vision_factors: self.vision_total,
            sequence: self.sequence,
        });
        self.marginalize(&order, &states);
        Ok(())
    }

    fn snapshot(&self) -> Option<PoseEstimate> {
        self.estimate.clone()
    }

    fn diagnostics(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Localizer state");
        match &self.anchor {
            Some(a) => {
                let _ = writeln!(
                    out,
                    "  anchor: t={} xyz=({:.3}, {:.3}, {:.3}) yaw={:.4} σt²={:.3e} σr²={:.3e}",
                    a.timestamp,
                    a.pose.translation.x,
                    a.pose.translation.y,
                    a.pose.translation.z,
                    a.pose.rotation.yaw(),
                    a.translation_var,
                    a.rotation_var,
                );
            }
            None => {
                let _ = writeln!(out, "  anchor: <none>");
            }
        }
        let _ = writeln!(
            out,
            "  factors: window={} odometry_total={} vision_total={} stale_dropped={}",
            self.factors.len(),
            self.odometry_total,
            self.vision_total,
            self.stale_dropped
        );
        for factor in &self.factors {
            match factor {
                Factor::Odometry(s) => {
                    let _ = writeln!(
                        out,
                        "    odom   t={} d=({:.4}, {:.4}, {:.4}) dyaw={:.4} σ=({}, {})",
                        s.timestamp,
                        s.delta.translation.x,
                        s.delta.translation.y,
                        s.delta.translation.z,
                        s.delta.rotation.yaw(),
                        s.translation_sigma,
                        s.rotation_sigma
                    );
                }
                Factor::Vision(m) => {
                    let _ = writeln!(
                        out,
                        "    vision t={} cam={} tag={} xyz=({:.3}, {:.3}, {:.3}) σ=({:.4}, {:.4})",
                        m.timestamp,
                        m.camera,
                        m.tag_id,
                        m.world_to_robot.translation.x,
                        m.world_to_robot.translation.y,
                        m.world_to_robot.translation.z,
                        m.translation_sigma,
                        m.rotation_sigma
                    );
                }
            }
        }
        match &self.estimate {
            Some(e) => {
                let _ = writeln!(
                    out,
                    "  estimate #{}: t={} xyz=({:.3}, {:.3}, {:.3}) yaw={:.4}",
                    e.sequence,
                    e.timestamp,
                    e.pose.translation.x,
                    e.pose.translation.y,
                    e.pose.translation.z,
                    e.pose.rotation.yaw()
                );
            }
            None => {
                let _ = writeln!(out, "  estimate: <none>");
            }
        }
        out
    }
}
