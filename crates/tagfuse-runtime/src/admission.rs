//! Temporal admission: the odometry watermark and the vision backlog.
//!
//! A vision observation may only reach the estimator once odometry covers
//! its capture time, i.e. once `observation.timestamp <= watermark`.
//! Observations that arrive earlier wait in the [`Backlog`].

use tagfuse_types::{Timestamp, VisionObservation};

/// Highest odometry timestamp seen so far.  Never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark(Timestamp);

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(self) -> Timestamp {
        self.0
    }

    /// Raise the watermark to `timestamp` if it is newer.  Returns `true`
    /// when the watermark moved.
    pub fn observe(&mut self, timestamp: Timestamp) -> bool {
        if timestamp > self.0 {
            self.0 = timestamp;
            true
        } else {
            false
        }
    }

    /// Whether an observation captured at `timestamp` may be delivered now.
    pub fn admits(self, timestamp: Timestamp) -> bool {
        timestamp <= self.0
    }
}

/// Vision observations that arrived ahead of the watermark.
#[derive(Debug, Default)]
pub struct Backlog {
    entries: Vec<VisionObservation>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: VisionObservation) {
        self.entries.push(observation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capture time of the newest waiting observation.
    pub fn newest(&self) -> Option<Timestamp> {
        self.entries.iter().map(|o| o.timestamp).max()
    }

    /// Remove and return exactly the entries `watermark` admits.
    ///
    /// The eligible set is split off in one pass before anything is handed
    /// out, so every eligible entry leaves exactly once and every ineligible
    /// entry stays.  The result is ordered by capture time; equal timestamps
    /// keep arrival order.
    pub fn take_eligible(&mut self, watermark: Watermark) -> Vec<VisionObservation> {
        let (mut eligible, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|o| watermark.admits(o.timestamp));
        self.entries = pending;
        eligible.sort_by_key(|o| o.timestamp);
        eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagfuse_types::Transform3D;

    fn obs(t: u64, camera: &str) -> VisionObservation {
        VisionObservation {
            timestamp: Timestamp(t),
            camera: camera.to_string(),
            robot_to_camera: Transform3D::identity(),
            detections: Vec::new(),
        }
    }

    #[test]
    fn watermark_is_running_maximum() {
        let mut wm = Watermark::new();
        assert_eq!(wm.get(), Timestamp::ZERO);
        let mut max_seen = 0;
        for t in [100, 50, 200, 150, 200, 300, 10] {
            let moved = wm.observe(Timestamp(t));
            assert_eq!(moved, t > max_seen);
            max_seen = max_seen.max(t);
            assert_eq!(wm.get(), Timestamp(max_seen));
        }
    }

    #[test]
    fn admission_boundary_is_inclusive() {
        let mut wm = Watermark::new();
        wm.observe(Timestamp(200));
        assert!(wm.admits(Timestamp(180)));
        assert!(wm.admits(Timestamp(200)));
        assert!(!wm.admits(Timestamp(201)));
    }

    #[test]
    fn take_eligible_removes_exactly_the_eligible_set() {
        let mut backlog = Backlog::new();
        // Interleave eligible and ineligible entries so that a scan which
        // pops from the front while iterating would go wrong.
        for (t, cam) in [(350, "a"), (250, "b"), (400, "c"), (260, "d"), (300, "e")] {
            backlog.push(obs(t, cam));
        }
        let mut wm = Watermark::new();
        wm.observe(Timestamp(300));

        let taken = backlog.take_eligible(wm);
        let cams: Vec<&str> = taken.iter().map(|o| o.camera.as_str()).collect();
        assert_eq!(cams, vec!["b", "d", "e"]);
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.newest(), Some(Timestamp(400)));

        // Nothing is handed out twice.
        assert!(backlog.take_eligible(wm).is_empty());
        assert_eq!(backlog.len(), 2);
    }

    #[test]
    fn take_eligible_keeps_arrival_order_on_ties() {
        let mut backlog = Backlog::new();
        backlog.push(obs(100, "first"));
        backlog.push(obs(100, "second"));
        let mut wm = Watermark::new();
        wm.observe(Timestamp(100));
        let taken = backlog.take_eligible(wm);
        assert_eq!(taken[0].camera, "first");
        assert_eq!(taken[1].camera, "second");
        assert!(backlog.is_empty());
    }

    #[test]
    fn nothing_eligible_leaves_backlog_untouched() {
        let mut backlog = Backlog::new();
        backlog.push(obs(500, "a"));
        let taken = backlog.take_eligible(Watermark::new());
        assert!(taken.is_empty());
        assert_eq!(backlog.len(), 1);
    }
}
