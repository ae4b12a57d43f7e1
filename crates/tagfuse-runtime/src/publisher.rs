//! [`DataPublisher`] – writes estimates into the telemetry table.
//!
//! Keys, relative to the table root:
//!
//! | Key | Value |
//! |---|---|
//! | `output/pose` | full [`Transform3D`](tagfuse_types::Transform3D) as JSON |
//! | `output/x`, `output/y`, `output/heading_rad` | planar summary |
//! | `output/translation_sigma`, `output/rotation_sigma` | 1σ uncertainty |
//! | `output/timestamp_us` | time of the newest fused factor |
//! | `output/sequence` | optimizations since the last reset |
//! | `output/factors` | `[odometry, vision]` factor counts |

use tagfuse_middleware::TelemetryTable;
use tagfuse_types::{FusionError, PoseEstimate};
use tracing::trace;

use crate::sources::ResultPublisher;

pub struct DataPublisher {
    table: TelemetryTable,
    published: u64,
}

impl DataPublisher {
    pub fn new(table: TelemetryTable) -> Self {
        Self {
            table,
            published: 0,
        }
    }

    pub fn table(&self) -> &TelemetryTable {
        &self.table
    }

    /// Estimates flushed so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl ResultPublisher for DataPublisher {
    fn update(&mut self, estimate: &PoseEstimate) -> Result<(), FusionError> {
        let pose = serde_json::to_value(estimate.pose)
            .map_err(|e| FusionError::Transport(format!("cannot encode pose: {e}")))?;
        self.table.set("output/pose", pose);
        self.table.set("output/x", estimate.pose.translation.x);
        self.table.set("output/y", estimate.pose.translation.y);
        self.table
            .set("output/heading_rad", estimate.pose.rotation.yaw());
        self.table
            .set("output/translation_sigma", estimate.uncertainty.translation_sigma);
        self.table
            .set("output/rotation_sigma", estimate.uncertainty.rotation_sigma);
        self.table
            .set("output/timestamp_us", estimate.timestamp.as_micros());
        self.table.set("output/sequence", estimate.sequence);
        self.table.set(
            "output/factors",
            serde_json::json!([estimate.odometry_factors, estimate.vision_factors]),
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FusionError> {
        let entries = self.table.flush()?;
        if entries > 0 {
            self.published += 1;
        }
        trace!(entries, "estimate flushed");
        Ok(())
    }
}
