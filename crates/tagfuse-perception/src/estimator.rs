//! The opaque pose-engine contract consumed by the update scheduler.

use tagfuse_types::{
    EstimationError, MarkerLayout, OdometrySample, PoseEstimate, PoseUncertainty, Timestamp,
    Transform3D, VisionObservation,
};
use tracing::info;

/// A stateful factor-fusing pose engine.
///
/// Factor insertion never solves; only [`optimize`](Self::optimize) does.
/// The scheduler is the only writer, and reads the solution back through
/// [`snapshot`](Self::snapshot) strictly after `optimize` returned `Ok`.
pub trait PoseEstimator {
    /// Discard all state and restart from `pose` at `timestamp`.
    fn reset(&mut self, pose: Transform3D, uncertainty: PoseUncertainty, timestamp: Timestamp);

    /// Record a relative-motion factor.
    fn add_odometry(&mut self, sample: &OdometrySample);

    /// Record the marker measurements of one camera frame, interpreted
    /// against `layout`.
    fn add_tag_observation(&mut self, observation: &VisionObservation, layout: &MarkerLayout);

    /// Solve the accumulated factors.
    ///
    /// # Errors
    ///
    /// Returns an [`EstimationError`] when no solution can be produced.  The
    /// engine's state after a failure is only meaningful for diagnostics.
    fn optimize(&mut self) -> Result<(), EstimationError>;

    /// Latest solution, if any optimize has succeeded since the last reset.
    fn snapshot(&self) -> Option<PoseEstimate>;

    /// Human-readable dump of the internal state.
    fn diagnostics(&self) -> String;

    /// Emit [`diagnostics`](Self::diagnostics) to the log.
    fn print(&self) {
        for line in self.diagnostics().lines() {
            info!(target: "tagfuse::estimator", "{line}");
        }
    }
}
