//! `tagfuse-runtime` – the update scheduler and its process plumbing.
//!
//! # Modules
//!
//! - [`scheduler`] – [`UpdateScheduler`][scheduler::UpdateScheduler]: one
//!   fusion step per tick.  Applies config changes, ingests odometry, gates
//!   vision on the odometry watermark, replays the backlog, checks readiness
//!   and finally optimizes and publishes.
//! - [`admission`] – [`Watermark`][admission::Watermark] and
//!   [`Backlog`][admission::Backlog]: the temporal admission rule for vision.
//! - [`readiness`] – [`ReadinessTracker`][readiness::ReadinessTracker]:
//!   initial-guess bookkeeping and per-tick go/no-go reports.
//! - [`sources`] – collaborator traits the scheduler is generic over.
//! - [`listeners`] – bus-backed config, odometry and camera sources.
//! - [`publisher`] – [`DataPublisher`][publisher::DataPublisher]: writes
//!   estimates to the telemetry table.
//! - [`driver`] – [`run_loop`][driver::run_loop]: fixed-period ticking with a
//!   not-ready backoff and cooperative shutdown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod admission;
pub mod driver;
pub mod listeners;
pub mod publisher;
pub mod readiness;
pub mod scheduler;
pub mod sources;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use admission::{Backlog, Watermark};
pub use driver::{LoopSummary, LoopTiming, run_loop};
pub use listeners::{CameraListener, CameraSettings, ConfigListener, ConfigUpdate, OdomListener};
pub use publisher::DataPublisher;
pub use readiness::{Readiness, ReadinessTracker};
pub use scheduler::{Collaborators, TickOutcome, UpdateScheduler};
pub use sources::{CameraSource, ConfigSource, OdometrySource, ResultPublisher};
pub use telemetry::{TracerProviderGuard, init_tracing};
