//! `tagfuse-middleware` – the in-process telemetry transport.
//!
//! Routes data between producers (odometry, cameras, configuration) and the
//! update scheduler without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`inbox`] – background receiver threads with a synchronous
//!   "drain everything since last call" interface.
//! - [`table`] – namespaced key-value table whose writes become visible on
//!   flush.

pub mod bus;
pub mod inbox;
pub mod table;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use inbox::Inbox;
pub use table::TelemetryTable;
