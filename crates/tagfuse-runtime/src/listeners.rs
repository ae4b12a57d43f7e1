//! Bus-backed implementations of the collaborator traits.
//!
//! Each listener owns one or more [`Inbox`]es fed by worker threads
//! subscribed to the [`EventBus`].  The scheduler only ever sees the
//! synchronous drain side.

use std::collections::VecDeque;
use std::time::Duration;

use tagfuse_middleware::{EventBus, Inbox, Topic};
use tagfuse_types::{
    EventPayload, FusionError, MarkerLayout, OdometrySample, PosePrior, Transform3D,
    VisionObservation,
};
use tracing::debug;

use crate::sources::{CameraSource, ConfigSource, OdometrySource};

/// One message from [`Topic::Config`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpdate {
    Prior(PosePrior),
    Layout(MarkerLayout),
}

/// Priors and layouts from [`Topic::Config`], in arrival order.
///
/// Both kinds share one inbox.  [`new_pose_prior`](ConfigSource::new_pose_prior)
/// only consumes the priors queued ahead of the first pending layout, and
/// [`new_tag_layout`](ConfigSource::new_tag_layout) only the layouts queued
/// ahead of the next prior.  Anything behind stays staged for the next poll,
/// so a prior published after a layout is never applied before it.  Within
/// a run of the same kind only the newest is reported.
pub struct ConfigListener {
    inbox: Inbox<ConfigUpdate>,
    staged: VecDeque<ConfigUpdate>,
}

impl ConfigListener {
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the worker thread cannot start.
    pub fn spawn(bus: &EventBus) -> Result<Self, FusionError> {
        let inbox = Inbox::spawn("config", bus.subscribe_to(Topic::Config), |event| {
            match event.payload {
                EventPayload::PosePrior(prior) => Some(ConfigUpdate::Prior(prior)),
                EventPayload::TagLayout(layout) => Some(ConfigUpdate::Layout(layout)),
                _ => None,
            }
        })?;
        Ok(Self::from_inbox(inbox))
    }

    pub fn from_inbox(inbox: Inbox<ConfigUpdate>) -> Self {
        Self {
            inbox,
            staged: VecDeque::new(),
        }
    }

    /// Updates received but not yet reported.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Pop the leading run of updates `take` accepts and keep the newest.
    fn take_run<T>(
        &mut self,
        what: &str,
        take: impl Fn(ConfigUpdate) -> Result<T, ConfigUpdate>,
    ) -> Option<T> {
        self.staged.extend(self.inbox.drain());
        let mut run = Vec::new();
        while let Some(update) = self.staged.pop_front() {
            match take(update) {
                Ok(item) => run.push(item),
                Err(other) => {
                    self.staged.push_front(other);
                    break;
                }
            }
        }
        if run.len() > 1 {
            debug!(superseded = run.len() - 1, "{what} updates coalesced");
        }
        run.pop()
    }
}

impl ConfigSource for ConfigListener {
    fn new_pose_prior(&mut self) -> Option<PosePrior> {
        self.take_run("pose prior", |update| match update {
            ConfigUpdate::Prior(prior) => Ok(prior),
            other => Err(other),
        })
    }

    fn new_tag_layout(&mut self) -> Option<MarkerLayout> {
        self.take_run("tag layout", |update| match update {
            ConfigUpdate::Layout(layout) => Ok(layout),
            other => Err(other),
        })
    }
}

/// Odometry samples from [`Topic::Odometry`].
pub struct OdomListener {
    inbox: Inbox<OdometrySample>,
}

impl OdomListener {
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the worker thread cannot start.
    pub fn spawn(bus: &EventBus) -> Result<Self, FusionError> {
        let inbox = Inbox::spawn("odometry", bus.subscribe_to(Topic::Odometry), |event| {
            match event.payload {
                EventPayload::Odometry(sample) => Some(sample),
                _ => None,
            }
        })?;
        Ok(Self::from_inbox(inbox))
    }

    pub fn from_inbox(inbox: Inbox<OdometrySample>) -> Self {
        Self { inbox }
    }
}

impl OdometrySource for OdomListener {
    fn update(&mut self) -> Vec<OdometrySample> {
        self.inbox.drain()
    }
}

/// Static description of one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub name: String,
    /// Mounting pose; overrides whatever the frame producer reported.
    pub robot_to_camera: Transform3D,
    /// A camera whose newest frame is older than this is not ready.
    pub stale_after: Duration,
}

/// Frames of one camera from [`Topic::Vision`].
///
/// Ready once a frame (with or without detections) has arrived within
/// `stale_after`.  Readiness only looks at the arrival time, so polling it
/// never consumes frames.
pub struct CameraListener {
    settings: CameraSettings,
    inbox: Inbox<VisionObservation>,
}

impl CameraListener {
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the worker thread cannot start.
    pub fn spawn(bus: &EventBus, settings: CameraSettings) -> Result<Self, FusionError> {
        let name = settings.name.clone();
        let inbox = Inbox::spawn(
            &format!("camera-{name}"),
            bus.subscribe_to(Topic::Vision),
            move |event| match event.payload {
                EventPayload::Vision(frame) if frame.camera == name => Some(frame),
                _ => None,
            },
        )?;
        Ok(Self::from_inbox(settings, inbox))
    }

    pub fn from_inbox(settings: CameraSettings, inbox: Inbox<VisionObservation>) -> Self {
        Self { settings, inbox }
    }
}

impl CameraSource for CameraListener {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn ready_to_optimize(&self) -> bool {
        self.inbox
            .last_received()
            .is_some_and(|at| at.elapsed() <= self.settings.stale_after)
    }

    fn update(&mut self) -> Vec<VisionObservation> {
        let mount = self.settings.robot_to_camera;
        self.inbox
            .drain()
            .into_iter()
            .map(|mut frame| {
                frame.robot_to_camera = mount;
                frame
            })
            .collect()
    }
}
