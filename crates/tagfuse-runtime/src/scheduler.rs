//! [`UpdateScheduler`] – one fusion step per [`tick`](UpdateScheduler::tick).
//!
//! Each tick runs these phases in order:
//!
//! 1. **Config** – apply a new pose prior if the estimator has no initial
//!    guess, then install a new marker layout (drops the initial guess).
//! 2. **Odometry** – feed every new sample to the estimator and raise the
//!    watermark to the newest sample timestamp.
//! 3. **Cameras** – poll every camera's readiness.  Frames of ready cameras
//!    are delivered immediately when the watermark admits them, otherwise
//!    parked in the backlog.
//! 4. **Backlog replay** – deliver every parked frame the watermark now
//!    admits, oldest first.
//! 5. **Readiness gate** – stop here if there is no initial guess or any
//!    camera is not ready.
//! 6. **Optimize and publish** – on failure the estimator dumps its state
//!    and the error is returned; nothing is published for that tick.
//!
//! A prior and a layout reported by the same poll therefore leave the system
//! without an initial guess.  [`ConfigListener`](crate::ConfigListener)
//! preserves arrival order across polls, so a prior published after a layout
//! is reported one tick later and re-arms readiness.

use tagfuse_perception::PoseEstimator;
use tagfuse_types::{
    EstimationError, FusionError, MarkerLayout, PoseEstimate, Timestamp, VisionObservation,
};
use tracing::{debug, error, info, instrument};

use crate::admission::{Backlog, Watermark};
use crate::readiness::{Readiness, ReadinessTracker};
use crate::sources::{CameraSource, ConfigSource, OdometrySource, ResultPublisher};

/// The data sources and sink a scheduler drives.
pub struct Collaborators {
    pub config: Box<dyn ConfigSource>,
    pub odometry: Box<dyn OdometrySource>,
    pub cameras: Vec<Box<dyn CameraSource>>,
    pub publisher: Box<dyn ResultPublisher>,
}

/// Result of one tick that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The estimator was optimized and the estimate handed to the publisher.
    Published(PoseEstimate),
    /// The readiness gate stopped the tick before optimization.
    NotReady(Readiness),
}

/// Owns the estimator and sequences admission, readiness and publication.
pub struct UpdateScheduler<E> {
    estimator: E,
    config: Box<dyn ConfigSource>,
    odometry: Box<dyn OdometrySource>,
    cameras: Vec<Box<dyn CameraSource>>,
    publisher: Box<dyn ResultPublisher>,
    layout: MarkerLayout,
    watermark: Watermark,
    backlog: Backlog,
    readiness: ReadinessTracker,
    ticks: u64,
}

impl<E: PoseEstimator> UpdateScheduler<E> {
    pub fn new(estimator: E, collaborators: Collaborators) -> Self {
        let Collaborators {
            config,
            odometry,
            cameras,
            publisher,
        } = collaborators;
        Self {
            estimator,
            config,
            odometry,
            cameras,
            publisher,
            layout: MarkerLayout::new(),
            watermark: Watermark::new(),
            backlog: Backlog::new(),
            readiness: ReadinessTracker::new(),
            ticks: 0,
        }
    }

    /// Run one fusion step.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Estimation`] if optimization fails (after the
    /// estimator has printed its diagnostics), or the publisher's error if
    /// the estimate could not be written.  Either is fatal to the loop.
    #[instrument(name = "tick", skip(self), fields(tick = self.ticks + 1))]
    pub fn tick(&mut self) -> Result<TickOutcome, FusionError> {
        self.ticks += 1;

        self.apply_config();
        self.ingest_odometry();

        let (frames, cameras_not_ready) = self.poll_cameras();
        for frame in frames {
            self.admit(frame);
        }
        self.replay_backlog();

        let readiness = self.readiness.assess(cameras_not_ready);
        if !readiness.is_ready() {
            debug!(%readiness, "skipping optimization");
            return Ok(TickOutcome::NotReady(readiness));
        }

        let estimate = self.optimize()?;
        self.publisher.update(&estimate)?;
        self.publisher.flush()?;
        debug!(
            sequence = estimate.sequence,
            timestamp = %estimate.timestamp,
            "estimate published"
        );
        Ok(TickOutcome::Published(estimate))
    }

    fn apply_config(&mut self) {
        if let Some(prior) = self.config.new_pose_prior() {
            if self.readiness.has_initial_guess() {
                info!(
                    timestamp = %prior.timestamp,
                    "pose prior ignored; estimator already has an initial guess"
                );
            } else {
                info!(
                    timestamp = %prior.timestamp,
                    x = prior.pose.translation.x,
                    y = prior.pose.translation.y,
                    yaw = prior.pose.rotation.yaw(),
                    "applying pose prior"
                );
                self.estimator
                    .reset(prior.pose, prior.uncertainty, prior.timestamp);
                self.readiness.prior_applied();
            }
        }

        if let Some(layout) = self.config.new_tag_layout() {
            info!(markers = layout.len(), "installing new tag layout");
            self.layout = layout;
            self.readiness.layout_installed();
        }
    }

    fn ingest_odometry(&mut self) {
        let samples = self.odometry.update();
        if samples.is_empty() {
            return;
        }
        for sample in &samples {
            self.estimator.add_odometry(sample);
            self.watermark.observe(sample.timestamp);
        }
        debug!(
            samples = samples.len(),
            watermark = %self.watermark.get(),
            "odometry ingested"
        );
    }

    /// Drain every ready camera.  Returns the frames and the names of the
    /// cameras that were not ready.
    fn poll_cameras(&mut self) -> (Vec<VisionObservation>, Vec<String>) {
        let mut frames = Vec::new();
        let mut not_ready = Vec::new();
        for camera in &mut self.cameras {
            if camera.ready_to_optimize() {
                frames.extend(camera.update());
            } else {
                not_ready.push(camera.name().to_string());
            }
        }
        (frames, not_ready)
    }

    fn admit(&mut self, frame: VisionObservation) {
        if self.watermark.admits(frame.timestamp) {
            self.estimator.add_tag_observation(&frame, &self.layout);
        } else {
            debug!(
                camera = %frame.camera,
                timestamp = %frame.timestamp,
                watermark = %self.watermark.get(),
                "frame ahead of odometry; backlogged"
            );
            self.backlog.push(frame);
        }
    }

    fn replay_backlog(&mut self) {
        let eligible = self.backlog.take_eligible(self.watermark);
        if eligible.is_empty() {
            return;
        }
        debug!(
            replayed = eligible.len(),
            remaining = self.backlog.len(),
            newest_pending_us = self.backlog.newest().map(Timestamp::as_micros),
            "backlog replayed"
        );
        for frame in &eligible {
            self.estimator.add_tag_observation(frame, &self.layout);
        }
    }

    fn optimize(&mut self) -> Result<PoseEstimate, FusionError> {
        let solved = self.estimator.optimize().and_then(|()| {
            self.estimator
                .snapshot()
                .ok_or_else(|| EstimationError::Diverged {
                    reason: "optimize succeeded without a solution".to_string(),
                })
        });
        match solved {
            Ok(estimate) => Ok(estimate),
            Err(e) => {
                error!(error = %e, tick = self.ticks, "optimization failed; estimator state follows");
                self.estimator.print();
                Err(e.into())
            }
        }
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn layout(&self) -> &MarkerLayout {
        &self.layout
    }

    pub fn watermark(&self) -> Timestamp {
        self.watermark.get()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn has_initial_guess(&self) -> bool {
        self.readiness.has_initial_guess()
    }

    /// `true` while a layout change has cleared the initial guess and no
    /// prior has been applied since.
    pub fn awaiting_prior_after_layout(&self) -> bool {
        self.readiness.awaiting_prior_after_layout()
    }

    /// Ticks run so far, including failed ones.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
