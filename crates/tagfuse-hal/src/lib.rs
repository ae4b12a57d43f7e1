//! `tagfuse-hal` – sensor sources that stand in for robot hardware.
//!
//! # Modules
//!
//! - [`sim`] – [`SimRobot`][sim::SimRobot]: a simulated robot that publishes
//!   odometry, camera frames, a marker layout and a start-pose prior on the
//!   event bus, so the full node runs headless in tests and demos.

pub mod sim;

pub use sim::{SimCamera, SimConfig, SimRobot, default_layout};
