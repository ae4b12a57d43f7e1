//! Node configuration – read from the TOML file named on the command line.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use tagfuse_hal::{SimCamera, SimConfig, default_layout};
use tagfuse_perception::LocalizerConfig;
use tagfuse_runtime::{CameraSettings, LoopTiming};
use tagfuse_types::{FusionError, MarkerLayout, Transform3D};

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the telemetry table the estimate is published under.
    #[serde(default = "default_root_table")]
    pub root_table_name: String,

    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Extra wait after a tick that was not ready to optimize.
    #[serde(default = "default_backoff_ms")]
    pub not_ready_backoff_ms: u64,

    /// Per-topic buffer of the in-process bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// When present, an in-process simulated robot feeds the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub name: String,

    /// The camera counts as not ready once its newest frame is this old.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    #[serde(default)]
    pub robot_to_camera: Transform3D,

    /// Only used by the simulator.
    #[serde(default = "default_fov_deg")]
    pub fov_deg: f64,

    /// Only used by the simulator.
    #[serde(default = "default_max_range_m")]
    pub max_range_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_history_window_us")]
    pub history_window_us: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            history_window_us: default_history_window_us(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_speed_mps")]
    pub speed_mps: f64,
    #[serde(default = "default_yaw_rate_rps")]
    pub yaw_rate_rps: f64,
    #[serde(default = "default_odometry_period_ms")]
    pub odometry_period_ms: u64,
    #[serde(default = "default_camera_period_ms")]
    pub camera_period_ms: u64,
    #[serde(default = "default_odometry_latency_us")]
    pub odometry_latency_us: u64,
    #[serde(default)]
    pub camera_latency_us: u64,
    #[serde(default)]
    pub start_pose: Transform3D,
    #[serde(default = "default_tag_std_dev")]
    pub tag_std_dev: f64,
    /// Marker map published at startup; a built-in room when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<MarkerLayout>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            speed_mps: default_speed_mps(),
            yaw_rate_rps: default_yaw_rate_rps(),
            odometry_period_ms: default_odometry_period_ms(),
            camera_period_ms: default_camera_period_ms(),
            odometry_latency_us: default_odometry_latency_us(),
            camera_latency_us: 0,
            start_pose: Transform3D::identity(),
            tag_std_dev: default_tag_std_dev(),
            markers: None,
        }
    }
}

fn default_root_table() -> String {
    "tagfuse".to_string()
}
fn default_tick_period_ms() -> u64 {
    10
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_bus_capacity() -> usize {
    1024
}
fn default_stale_after_ms() -> u64 {
    500
}
fn default_fov_deg() -> f64 {
    90.0
}
fn default_max_range_m() -> f64 {
    8.0
}
fn default_history_window_us() -> u64 {
    tagfuse_perception::localizer::DEFAULT_HISTORY_WINDOW_US
}
fn default_speed_mps() -> f64 {
    0.5
}
fn default_yaw_rate_rps() -> f64 {
    0.1
}
fn default_odometry_period_ms() -> u64 {
    10
}
fn default_camera_period_ms() -> u64 {
    50
}
fn default_odometry_latency_us() -> u64 {
    30_000
}
fn default_tag_std_dev() -> f64 {
    0.02
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_table_name: default_root_table(),
            tick_period_ms: default_tick_period_ms(),
            not_ready_backoff_ms: default_backoff_ms(),
            bus_capacity: default_bus_capacity(),
            cameras: Vec::new(),
            estimator: EstimatorConfig::default(),
            simulation: None,
        }
    }
}

impl Config {
    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            tick_period: Duration::from_millis(self.tick_period_ms),
            not_ready_backoff: Duration::from_millis(self.not_ready_backoff_ms),
        }
    }

    pub fn camera_settings(&self) -> Vec<CameraSettings> {
        self.cameras
            .iter()
            .map(|c| CameraSettings {
                name: c.name.clone(),
                robot_to_camera: c.robot_to_camera,
                stale_after: Duration::from_millis(c.stale_after_ms),
            })
            .collect()
    }

    pub fn localizer_config(&self) -> LocalizerConfig {
        LocalizerConfig {
            history_window_us: self.estimator.history_window_us,
        }
    }

    /// Simulator settings, with one simulated camera per configured camera.
    pub fn sim_config(&self) -> Option<SimConfig> {
        let sim = self.simulation.as_ref()?;
        Some(SimConfig {
            start_pose: sim.start_pose,
            speed_mps: sim.speed_mps,
            yaw_rate_rps: sim.yaw_rate_rps,
            odometry_period_us: sim.odometry_period_ms * 1_000,
            camera_period_us: sim.camera_period_ms * 1_000,
            odometry_latency_us: sim.odometry_latency_us,
            camera_latency_us: sim.camera_latency_us,
            tag_std_dev: sim.tag_std_dev,
            layout: sim.markers.clone().unwrap_or_else(default_layout),
            cameras: self
                .cameras
                .iter()
                .map(|c| SimCamera {
                    name: c.name.clone(),
                    robot_to_camera: c.robot_to_camera,
                    fov_rad: c.fov_deg.to_radians(),
                    max_range_m: c.max_range_m,
                })
                .collect(),
            ..SimConfig::default()
        })
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<(), FusionError> {
        if self.root_table_name.trim().is_empty() {
            return Err(FusionError::Config("root_table_name must not be empty".to_string()));
        }
        if self.tick_period_ms == 0 {
            return Err(FusionError::Config("tick_period_ms must be non-zero".to_string()));
        }
        if self.bus_capacity == 0 {
            return Err(FusionError::Config("bus_capacity must be non-zero".to_string()));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(FusionError::Config("camera name must not be empty".to_string()));
            }
            if !seen.insert(camera.name.as_str()) {
                return Err(FusionError::Config(format!(
                    "camera name {:?} is used more than once",
                    camera.name
                )));
            }
            if camera.stale_after_ms == 0 {
                return Err(FusionError::Config(format!(
                    "camera {:?}: stale_after_ms must be non-zero",
                    camera.name
                )));
            }
        }
        if let Some(sim) = &self.simulation {
            if sim.odometry_period_ms == 0 || sim.camera_period_ms == 0 {
                return Err(FusionError::Config(
                    "simulation periods must be non-zero".to_string(),
                ));
            }
            // Detection noise scales with it; zero makes every vision
            // factor invalid once the estimator runs.
            if !(sim.tag_std_dev.is_finite() && sim.tag_std_dev > 0.0) {
                return Err(FusionError::Config(format!(
                    "simulation.tag_std_dev must be positive, got {}",
                    sim.tag_std_dev
                )));
            }
            if !(sim.speed_mps.is_finite() && sim.yaw_rate_rps.is_finite()) {
                return Err(FusionError::Config(
                    "simulation speed and yaw rate must be finite".to_string(),
                ));
            }
            for camera in &self.cameras {
                if !(camera.fov_deg.is_finite()
                    && camera.fov_deg > 0.0
                    && camera.max_range_m.is_finite()
                    && camera.max_range_m > 0.0)
                {
                    return Err(FusionError::Config(format!(
                        "camera {:?}: fov_deg and max_range_m must be positive",
                        camera.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Load, override from the environment, and validate.
pub fn load_from(path: &Path) -> Result<Config, FusionError> {
    let mut cfg = read_file(path)?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse `path` as-is, without environment overrides or validation.
pub(crate) fn read_file(path: &Path) -> Result<Config, FusionError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        FusionError::Config(format!("failed to read config at {}: {}", path.display(), e))
    })?;
    toml::from_str(&raw).map_err(|e| {
        FusionError::Config(format!("failed to parse config at {}: {}", path.display(), e))
    })
}

/// Apply `TAGFUSE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TAGFUSE_ROOT_TABLE` | `root_table_name` |
/// | `TAGFUSE_TICK_PERIOD_MS` | `tick_period_ms` |
/// | `TAGFUSE_BACKOFF_MS` | `not_ready_backoff_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TAGFUSE_ROOT_TABLE") {
        cfg.root_table_name = v;
    }
    if let Ok(v) = std::env::var("TAGFUSE_TICK_PERIOD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.tick_period_ms = ms;
    }
    if let Ok(v) = std::env::var("TAGFUSE_BACKOFF_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.not_ready_backoff_ms = ms;
    }
}
