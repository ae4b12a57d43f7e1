//! In-process robot simulator for running the fusion node without hardware.
//!
//! [`SimRobot`] drives along a constant-curvature arc through a field of
//! fiducial markers and produces what the real robot would put on the bus:
//!
//! | Topic | Payload |
//! |---|---|
//! | [`Topic::Config`] | the marker layout, then the true start pose as a prior (once, at startup) |
//! | [`Topic::Odometry`] | one [`OdometrySample`] per step |
//! | [`Topic::Vision`] | one [`VisionObservation`] per camera every `camera_period_us` |
//!
//! Odometry and camera frames can be held back by independent latencies, so
//! frames routinely arrive before the odometry that covers them.
//!
//! Measurements are noise-free; the reported sigmas are what the estimator
//! weights them with.
//!
//! # Example
//!
//! ```rust
//! use tagfuse_hal::sim::{SimConfig, SimRobot};
//!
//! let mut robot = SimRobot::new(SimConfig::default());
//! let startup = robot.startup_events();
//! assert_eq!(startup.len(), 2);
//! let first = robot.step();
//! assert!(!first.is_empty());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tagfuse_middleware::{EventBus, Topic};
use tagfuse_types::{
    Event, EventPayload, FusionError, MarkerLayout, OdometrySample, PosePrior, PoseUncertainty,
    TagDetection, Timestamp, Transform3D, VisionObservation,
};
use tracing::{debug, info, warn};

const SOURCE: &str = "tagfuse-hal::sim";

/// A simulated camera.  Looks along its local +X axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SimCamera {
    pub name: String,
    pub robot_to_camera: Transform3D,
    /// Full horizontal field of view (radians).
    pub fov_rad: f64,
    pub max_range_m: f64,
}

impl SimCamera {
    pub fn new(name: impl Into<String>, robot_to_camera: Transform3D) -> Self {
        Self {
            name: name.into(),
            robot_to_camera,
            fov_rad: 90f64.to_radians(),
            max_range_m: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub start_pose: Transform3D,
    /// Sim clock at the first step.
    pub start_time_us: u64,
    pub speed_mps: f64,
    pub yaw_rate_rps: f64,
    pub odometry_period_us: u64,
    pub camera_period_us: u64,
    /// Delay between an odometry sample's timestamp and its publication.
    pub odometry_latency_us: u64,
    /// Delay between a frame's capture and its publication.
    pub camera_latency_us: u64,
    pub odometry_sigma: PoseUncertainty,
    pub prior_sigma: PoseUncertainty,
    pub tag_std_dev: f64,
    pub layout: MarkerLayout,
    pub cameras: Vec<SimCamera>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_pose: Transform3D::identity(),
            start_time_us: 1_000_000,
            speed_mps: 0.5,
            yaw_rate_rps: 0.1,
            odometry_period_us: 10_000,
            camera_period_us: 50_000,
            odometry_latency_us: 30_000,
            camera_latency_us: 0,
            odometry_sigma: PoseUncertainty::new(0.005, 0.002),
            prior_sigma: PoseUncertainty::new(0.25, 0.1),
            tag_std_dev: 0.02,
            layout: default_layout(),
            cameras: vec![
                SimCamera::new("front", Transform3D::from_planar(0.3, 0.0, 0.0)),
                SimCamera::new("rear", Transform3D::from_planar(-0.3, 0.0, std::f64::consts::PI)),
            ],
        }
    }
}

/// Eight markers on the walls of a 10 m × 10 m room centred on the origin,
/// each facing the centre.
pub fn default_layout() -> MarkerLayout {
    use std::f64::consts::{FRAC_PI_2, PI};
    [
        (1, 5.0, -2.0, PI),
        (2, 5.0, 2.0, PI),
        (3, 2.0, 5.0, -FRAC_PI_2),
        (4, -2.0, 5.0, -FRAC_PI_2),
        (5, -5.0, 2.0, 0.0),
        (6, -5.0, -2.0, 0.0),
        (7, -2.0, -5.0, FRAC_PI_2),
        (8, 2.0, -5.0, FRAC_PI_2),
    ]
    .into_iter()
    .fold(MarkerLayout::new(), |layout, (id, x, y, yaw)| {
        layout.with_marker(id, Transform3D::from_planar(x, y, yaw))
    })
}

struct Pending {
    release_us: u64,
    topic: Topic,
    payload: EventPayload,
}

/// Ground-truth robot plus its sensors.
pub struct SimRobot {
    config: SimConfig,
    truth: Transform3D,
    clock_us: u64,
    next_frame_us: u64,
    pending: Vec<Pending>,
}

impl SimRobot {
    pub fn new(config: SimConfig) -> Self {
        Self {
            truth: config.start_pose,
            clock_us: config.start_time_us,
            next_frame_us: config.start_time_us,
            pending: Vec::new(),
            config,
        }
    }

    pub fn truth(&self) -> Transform3D {
        self.truth
    }

    pub fn clock(&self) -> Timestamp {
        Timestamp(self.clock_us)
    }

    /// Layout first, then the prior: the prior must follow the layout it
    /// belongs to, or the layout change would discard it.
    pub fn startup_events(&self) -> Vec<(Topic, EventPayload)> {
        vec![
            (Topic::Config, EventPayload::TagLayout(self.config.layout.clone())),
            (
                Topic::Config,
                EventPayload::PosePrior(PosePrior {
                    pose: self.truth,
                    uncertainty: self.config.prior_sigma,
                    timestamp: Timestamp(self.clock_us),
                }),
            ),
        ]
    }

    /// Advance one odometry period.  Returns the events whose publication
    /// time has come, oldest release first.
    pub fn step(&mut self) -> Vec<(Topic, EventPayload)> {
        let dt_us = self.config.odometry_period_us.max(1);
        let dt = dt_us as f64 * 1e-6;
        let delta = Transform3D::from_planar(
            self.config.speed_mps * dt,
            0.0,
            self.config.yaw_rate_rps * dt,
        );
        self.truth = self.truth.compose(delta);
        self.clock_us += dt_us;

        self.pending.push(Pending {
            release_us: self.clock_us + self.config.odometry_latency_us,
            topic: Topic::Odometry,
            payload: EventPayload::Odometry(OdometrySample {
                timestamp: Timestamp(self.clock_us),
                delta,
                translation_sigma: self.config.odometry_sigma.translation_sigma,
                rotation_sigma: self.config.odometry_sigma.rotation_sigma,
            }),
        });

        if self.clock_us >= self.next_frame_us {
            for camera in &self.config.cameras {
                let frame = self.observe(camera);
                self.pending.push(Pending {
                    release_us: self.clock_us + self.config.camera_latency_us,
                    topic: Topic::Vision,
                    payload: EventPayload::Vision(frame),
                });
            }
            self.next_frame_us = self.clock_us + self.config.camera_period_us.max(1);
        }

        let now = self.clock_us;
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|p| p.release_us <= now);
        self.pending = waiting;
        due.sort_by_key(|p| p.release_us);
        due.into_iter().map(|p| (p.topic, p.payload)).collect()
    }

    /// What `camera` sees from the current true pose.
    pub fn observe(&self, camera: &SimCamera) -> VisionObservation {
        let world_to_camera = self.truth.compose(camera.robot_to_camera);
        let camera_to_world = world_to_camera.inverse();
        let half_fov = camera.fov_rad / 2.0;
        let detections = self
            .config
            .layout
            .iter()
            .filter_map(|(tag_id, world_to_tag)| {
                let camera_to_tag = camera_to_world.compose(world_to_tag);
                let t = camera_to_tag.translation;
                let range = t.norm();
                let bearing = t.y.atan2(t.x);
                (t.x > 0.0 && range <= camera.max_range_m && bearing.abs() <= half_fov).then(|| {
                    TagDetection {
                        tag_id,
                        camera_to_tag,
                        std_dev: self.config.tag_std_dev,
                    }
                })
            })
            .collect();
        VisionObservation {
            timestamp: Timestamp(self.clock_us),
            camera: camera.name.clone(),
            robot_to_camera: camera.robot_to_camera,
            detections,
        }
    }

    /// Run the simulator on its own thread, publishing onto `bus` in real
    /// time until `shutdown` is set.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Transport`] if the thread cannot be spawned.
    pub fn spawn(mut self, bus: EventBus, shutdown: Arc<AtomicBool>) -> Result<JoinHandle<()>, FusionError> {
        let period = Duration::from_micros(self.config.odometry_period_us.max(1));
        thread::Builder::new()
            .name("sim-robot".to_string())
            .spawn(move || {
                info!(
                    cameras = self.config.cameras.len(),
                    markers = self.config.layout.len(),
                    "simulated robot started"
                );
                for (topic, payload) in self.startup_events() {
                    publish(&bus, topic, payload);
                }
                while !shutdown.load(Ordering::SeqCst) {
                    for (topic, payload) in self.step() {
                        publish(&bus, topic, payload);
                    }
                    thread::sleep(period);
                }
                debug!(clock = %self.clock(), "simulated robot stopped");
            })
            .map_err(|e| FusionError::Transport(format!("failed to spawn simulator: {e}")))
    }
}

fn publish(bus: &EventBus, topic: Topic, payload: EventPayload) {
    if let Err(e) = bus.publish_to(topic, Event::new(SOURCE, payload)) {
        warn!(?topic, error = %e, "simulator publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(events: &[(Topic, EventPayload)], topic: Topic) -> usize {
        events.iter().filter(|(t, _)| *t == topic).count()
    }

    #[test]
    fn startup_sends_layout_then_prior() {
        let robot = SimRobot::new(SimConfig::default());
        let events = robot.startup_events();
        assert!(matches!(events[0].1, EventPayload::TagLayout(_)));
        let EventPayload::PosePrior(prior) = &events[1].1 else {
            panic!("expected prior");
        };
        assert_eq!(prior.timestamp, Timestamp(1_000_000));
        assert_eq!(prior.pose, Transform3D::identity());
    }

    #[test]
    fn odometry_is_released_after_its_latency() {
        let mut robot = SimRobot::new(SimConfig {
            odometry_latency_us: 20_000,
            cameras: Vec::new(),
            ..SimConfig::default()
        });
        assert_eq!(count(&robot.step(), Topic::Odometry), 0);
        assert_eq!(count(&robot.step(), Topic::Odometry), 0);
        let third = robot.step();
        assert_eq!(count(&third, Topic::Odometry), 1);
        let EventPayload::Odometry(sample) = &third[0].1 else {
            panic!("expected odometry");
        };
        assert_eq!(sample.timestamp, Timestamp(1_010_000));
    }

    #[test]
    fn frames_run_ahead_of_delayed_odometry() {
        let mut robot = SimRobot::new(SimConfig::default());
        let first = robot.step();
        assert_eq!(count(&first, Topic::Vision), 2);
        assert_eq!(count(&first, Topic::Odometry), 0);
    }

    #[test]
    fn odometry_deltas_reproduce_truth() {
        let config = SimConfig {
            odometry_latency_us: 0,
            ..SimConfig::default()
        };
        let start = config.start_pose;
        let mut robot = SimRobot::new(config);
        let mut dead_reckoned = start;
        for _ in 0..200 {
            for (_, payload) in robot.step() {
                if let EventPayload::Odometry(s) = payload {
                    dead_reckoned = dead_reckoned.compose(s.delta);
                }
            }
        }
        let err = dead_reckoned.translation.sub(robot.truth().translation).norm();
        assert!(err < 1e-9, "dead reckoning drifted by {err}");
        assert!(robot.truth().translation.x > 0.5);
    }

    #[test]
    fn camera_sees_tag_straight_ahead() {
        let config = SimConfig {
            start_pose: Transform3D::from_planar(0.0, 0.0, 0.0),
            layout: MarkerLayout::new()
                .with_marker(1, Transform3D::from_planar(3.0, 0.0, std::f64::consts::PI))
                .with_marker(2, Transform3D::from_planar(-3.0, 0.0, 0.0)),
            cameras: vec![SimCamera::new("front", Transform3D::from_planar(0.5, 0.0, 0.0))],
            ..SimConfig::default()
        };
        let robot = SimRobot::new(config.clone());
        let frame = robot.observe(&config.cameras[0]);
        assert_eq!(frame.detections.len(), 1);
        let det = &frame.detections[0];
        assert_eq!(det.tag_id, 1);
        assert!((det.camera_to_tag.translation.x - 2.5).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_tags_are_not_seen() {
        let config = SimConfig {
            layout: MarkerLayout::new().with_marker(1, Transform3D::from_planar(20.0, 0.0, 0.0)),
            cameras: vec![SimCamera::new("front", Transform3D::identity())],
            ..SimConfig::default()
        };
        let robot = SimRobot::new(config.clone());
        assert!(robot.observe(&config.cameras[0]).detections.is_empty());
    }

    #[test]
    fn spawned_robot_publishes_until_shutdown() {
        let bus = EventBus::default();
        let mut config_rx = bus.subscribe_to(Topic::Config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = SimRobot::new(SimConfig::default())
            .spawn(bus.clone(), Arc::clone(&shutdown))
            .unwrap();

        let first = config_rx.blocking_recv().unwrap();
        assert!(matches!(first.payload, EventPayload::TagLayout(_)));
        assert_eq!(first.source, SOURCE);

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
