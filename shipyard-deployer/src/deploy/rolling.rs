//! Rolling update capacity bounds

use tracing::warn;

/// Instance counts a rolling update must stay within
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityBounds {
    /// Healthy instances that must keep running at all times
    pub min_healthy: u32,
    /// Instances (old and new together) that may run at once
    pub max_running: u32,
}

impl CapacityBounds {
    /// Bounds for `desired` instances
    ///
    /// The healthy floor rounds up and the ceiling rounds down. When rounding
    /// leaves no room to start even one replacement, the ceiling is raised to
    /// one above the floor so the update can make progress.
    pub fn new(desired: u32, minimum_healthy_percent: u32, maximum_percent: u32) -> Self {
        let desired = u64::from(desired);
        let min_healthy = (desired * u64::from(minimum_healthy_percent)).div_ceil(100) as u32;
        let mut max_running = (desired * u64::from(maximum_percent) / 100) as u32;

        if desired > 0 && max_running <= min_healthy {
            warn!(
                "maximum percent {} leaves no room above {} healthy instance(s), allowing one extra",
                maximum_percent, min_healthy
            );
            max_running = min_healthy + 1;
        }

        Self {
            min_healthy,
            max_running,
        }
    }

    /// Replacements that can start now
    pub fn headroom(&self, running: u32) -> u32 {
        self.max_running.saturating_sub(running)
    }

    /// Old instances that can stop now without breaching the healthy floor
    pub fn surplus(&self, healthy: u32) -> u32 {
        healthy.saturating_sub(self.min_healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_percentages() {
        let bounds = CapacityBounds::new(4, 100, 200);
        assert_eq!(bounds.min_healthy, 4);
        assert_eq!(bounds.max_running, 8);
        assert_eq!(bounds.headroom(4), 4);
        assert_eq!(bounds.surplus(4), 0);
    }

    #[test]
    fn test_rounding() {
        let bounds = CapacityBounds::new(3, 50, 150);
        assert_eq!(bounds.min_healthy, 2);
        assert_eq!(bounds.max_running, 4);
        assert_eq!(bounds.surplus(3), 1);
    }

    #[test]
    fn test_no_headroom_is_widened() {
        let bounds = CapacityBounds::new(1, 50, 150);
        assert_eq!(bounds.min_healthy, 1);
        assert_eq!(bounds.max_running, 2);
    }

    #[test]
    fn test_zero_desired() {
        let bounds = CapacityBounds::new(0, 100, 200);
        assert_eq!(bounds.min_healthy, 0);
        assert_eq!(bounds.max_running, 0);
    }
}
