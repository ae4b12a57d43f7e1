//! Collaborator contracts consumed by the update scheduler.
//!
//! Every source exposes a synchronous "drain what accumulated since the last
//! call" operation.  Implementations may receive data on background threads,
//! but what they hand back must be a point-in-time snapshot.

use tagfuse_types::{FusionError, MarkerLayout, OdometrySample, PoseEstimate, PosePrior, VisionObservation};

/// Pose priors and marker layouts, reported on change only.
///
/// The scheduler asks for the prior first and the layout second.
pub trait ConfigSource {
    /// The newest prior published since the previous call, if any.
    fn new_pose_prior(&mut self) -> Option<PosePrior>;

    /// The newest layout published since the previous call, if any.
    fn new_tag_layout(&mut self) -> Option<MarkerLayout>;
}

/// Relative-motion samples.
pub trait OdometrySource {
    /// Samples received since the previous call, in arrival order.  May be
    /// empty; timestamps are not guaranteed to be monotonic.
    fn update(&mut self) -> Vec<OdometrySample>;
}

/// One physical camera.
pub trait CameraSource {
    /// Stable identifier used in logs and readiness reports.
    fn name(&self) -> &str;

    /// Whether this camera is warmed up.  Must not consume data.
    fn ready_to_optimize(&self) -> bool;

    /// Frames received since the previous call.  Only called when
    /// [`ready_to_optimize`](Self::ready_to_optimize) returned `true` this
    /// tick.
    fn update(&mut self) -> Vec<VisionObservation>;
}

/// Writes the fused estimate to the telemetry transport.
pub trait ResultPublisher {
    /// Stage `estimate` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the estimate cannot be encoded.
    fn update(&mut self, estimate: &PoseEstimate) -> Result<(), FusionError>;

    /// Push everything staged by [`update`](Self::update) onto the wire.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the transport rejects the batch.
    fn flush(&mut self) -> Result<(), FusionError>;
}
