//! Recording doubles for scheduler and driver tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tagfuse_perception::PoseEstimator;
use tagfuse_types::{
    EstimationError, FusionError, MarkerLayout, OdometrySample, PoseEstimate, PosePrior,
    PoseUncertainty, Timestamp, Transform3D, VisionObservation,
};

use crate::scheduler::{Collaborators, UpdateScheduler};
use crate::sources::{CameraSource, ConfigSource, OdometrySource, ResultPublisher};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Reset(Timestamp),
    Odometry(Timestamp),
    Vision(String, Timestamp),
    Optimize,
    Print,
    Publish(u64),
    Flush,
}

/// Shared, ordered record of every collaborator call.
#[derive(Clone, Default)]
pub struct Log {
    calls: Rc<RefCell<Vec<Call>>>,
    layout_sizes: Rc<RefCell<Vec<usize>>>,
}

impl Log {
    fn push(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn contains(&self, call: &Call) -> bool {
        self.calls.borrow().contains(call)
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.borrow().iter().filter(|c| *c == call).count()
    }

    pub fn vision(&self) -> Vec<(String, Timestamp)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Vision(cam, t) => Some((cam.clone(), *t)),
                _ => None,
            })
            .collect()
    }

    pub fn resets(&self) -> Vec<Timestamp> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Reset(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<u64> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Publish(seq) => Some(*seq),
                _ => None,
            })
            .collect()
    }

    /// Size of the layout passed with each vision factor.
    pub fn layout_sizes(&self) -> Vec<usize> {
        self.layout_sizes.borrow().clone()
    }
}

pub struct MockEstimator {
    log: Log,
    fail: Rc<Cell<bool>>,
    initialized: bool,
    newest: Timestamp,
    sequence: u64,
    estimate: Option<PoseEstimate>,
}

impl PoseEstimator for MockEstimator {
    fn reset(&mut self, _pose: Transform3D, _uncertainty: PoseUncertainty, timestamp: Timestamp) {
        self.log.push(Call::Reset(timestamp));
        self.initialized = true;
        self.newest = timestamp;
        self.sequence = 0;
        self.estimate = None;
    }

    fn add_odometry(&mut self, sample: &OdometrySample) {
        self.log.push(Call::Odometry(sample.timestamp));
        self.newest = self.newest.max(sample.timestamp);
    }

    fn add_tag_observation(&mut self, observation: &VisionObservation, layout: &MarkerLayout) {
        self.log
            .push(Call::Vision(observation.camera.clone(), observation.timestamp));
        self.log.layout_sizes.borrow_mut().push(layout.len());
        self.newest = self.newest.max(observation.timestamp);
    }

    fn optimize(&mut self) -> Result<(), EstimationError> {
        self.log.push(Call::Optimize);
        if self.fail.get() {
            return Err(EstimationError::Diverged {
                reason: "scripted failure".to_string(),
            });
        }
        if !self.initialized {
            return Err(EstimationError::NotInitialized);
        }
        self.sequence += 1;
        self.estimate = Some(PoseEstimate {
            timestamp: self.newest,
            pose: Transform3D::identity(),
            uncertainty: PoseUncertainty::new(0.1, 0.1),
            odometry_factors: 0,
            vision_factors: 0,
            sequence: self.sequence,
        });
        Ok(())
    }

    fn snapshot(&self) -> Option<PoseEstimate> {
        self.estimate.clone()
    }

    fn diagnostics(&self) -> String {
        format!("mock estimator, newest factor {}", self.newest)
    }

    fn print(&self) {
        self.log.push(Call::Print);
    }
}

#[derive(Default)]
pub struct ConfigScript {
    pub prior: Option<PosePrior>,
    pub layout: Option<MarkerLayout>,
}

struct MockConfig(Rc<RefCell<ConfigScript>>);

impl ConfigSource for MockConfig {
    fn new_pose_prior(&mut self) -> Option<PosePrior> {
        self.0.borrow_mut().prior.take()
    }

    fn new_tag_layout(&mut self) -> Option<MarkerLayout> {
        self.0.borrow_mut().layout.take()
    }
}

struct MockOdometry(Rc<RefCell<Vec<OdometrySample>>>);

impl OdometrySource for MockOdometry {
    fn update(&mut self) -> Vec<OdometrySample> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

#[derive(Default)]
pub struct CameraScript {
    pub ready: bool,
    pub frames: Vec<VisionObservation>,
    pub update_calls: usize,
}

struct MockCamera {
    name: String,
    script: Rc<RefCell<CameraScript>>,
}

impl CameraSource for MockCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready_to_optimize(&self) -> bool {
        self.script.borrow().ready
    }

    fn update(&mut self) -> Vec<VisionObservation> {
        let mut script = self.script.borrow_mut();
        script.update_calls += 1;
        std::mem::take(&mut script.frames)
    }
}

struct MockPublisher {
    log: Log,
    fail: Rc<Cell<bool>>,
}

impl ResultPublisher for MockPublisher {
    fn update(&mut self, estimate: &PoseEstimate) -> Result<(), FusionError> {
        if self.fail.get() {
            return Err(FusionError::Transport("scripted failure".to_string()));
        }
        self.log.push(Call::Publish(estimate.sequence));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FusionError> {
        self.log.push(Call::Flush);
        Ok(())
    }
}

/// A scheduler wired to scriptable doubles, plus handles to script them.
pub struct Harness {
    pub scheduler: UpdateScheduler<MockEstimator>,
    pub log: Log,
    pub config: Rc<RefCell<ConfigScript>>,
    pub odometry: Rc<RefCell<Vec<OdometrySample>>>,
    pub cameras: Vec<Rc<RefCell<CameraScript>>>,
    pub fail_optimize: Rc<Cell<bool>>,
    pub fail_publish: Rc<Cell<bool>>,
}

impl Harness {
    pub fn new(camera_names: &[&str]) -> Self {
        Self::build(camera_names, None)
    }

    /// Like [`Harness::new`] but with a real config source in place of the
    /// scripted one.  `config` is then left unused.
    pub fn with_config(camera_names: &[&str], source: Box<dyn ConfigSource>) -> Self {
        Self::build(camera_names, Some(source))
    }

    fn build(camera_names: &[&str], source: Option<Box<dyn ConfigSource>>) -> Self {
        let log = Log::default();
        let config = Rc::new(RefCell::new(ConfigScript::default()));
        let odometry = Rc::new(RefCell::new(Vec::new()));
        let fail_optimize = Rc::new(Cell::new(false));
        let fail_publish = Rc::new(Cell::new(false));

        let cameras: Vec<Rc<RefCell<CameraScript>>> = camera_names
            .iter()
            .map(|_| Rc::new(RefCell::new(CameraScript::default())))
            .collect();
        let camera_sources: Vec<Box<dyn CameraSource>> = camera_names
            .iter()
            .zip(&cameras)
            .map(|(name, script)| {
                Box::new(MockCamera {
                    name: name.to_string(),
                    script: Rc::clone(script),
                }) as Box<dyn CameraSource>
            })
            .collect();

        let estimator = MockEstimator {
            log: log.clone(),
            fail: Rc::clone(&fail_optimize),
            initialized: false,
            newest: Timestamp::ZERO,
            sequence: 0,
            estimate: None,
        };
        let scheduler = UpdateScheduler::new(
            estimator,
            Collaborators {
                config: source.unwrap_or_else(|| Box::new(MockConfig(Rc::clone(&config)))),
                odometry: Box::new(MockOdometry(Rc::clone(&odometry))),
                cameras: camera_sources,
                publisher: Box::new(MockPublisher {
                    log: log.clone(),
                    fail: Rc::clone(&fail_publish),
                }),
            },
        );

        Self {
            scheduler,
            log,
            config,
            odometry,
            cameras,
            fail_optimize,
            fail_publish,
        }
    }
}

pub fn prior(t: u64) -> PosePrior {
    PosePrior {
        pose: Transform3D::identity(),
        uncertainty: PoseUncertainty::new(0.5, 0.2),
        timestamp: Timestamp(t),
    }
}

pub fn layout() -> MarkerLayout {
    MarkerLayout::new()
        .with_marker(1, Transform3D::from_planar(5.0, 0.0, 0.0))
        .with_marker(2, Transform3D::from_planar(0.0, 5.0, 0.0))
}

pub fn odom(t: u64) -> OdometrySample {
    OdometrySample {
        timestamp: Timestamp(t),
        delta: Transform3D::from_planar(0.01, 0.0, 0.0),
        translation_sigma: 0.01,
        rotation_sigma: 0.01,
    }
}

pub fn frame(camera: &str, t: u64) -> VisionObservation {
    VisionObservation {
        timestamp: Timestamp(t),
        camera: camera.to_string(),
        robot_to_camera: Transform3D::identity(),
        detections: Vec::new(),
    }
}
