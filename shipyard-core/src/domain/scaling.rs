//! Target-tracking scaling
//!
//! Each metric proposes the worker count that would bring it back to its
//! target, assuming load spreads evenly: `ceil(current * observed / target)`.
//! The larger proposal wins, so a hot metric always beats a cold one.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::service::ServiceState;

/// Scaling bounds and targets
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub target_cpu_percent: f64,
    pub target_mem_percent: f64,
    /// How far below target both metrics must sit before scaling in
    pub scale_in_margin_percent: f64,
    pub scale_out_cooldown: Duration,
    pub scale_in_cooldown: Duration,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_capacity: 1,
            max_capacity: 5,
            target_cpu_percent: 70.0,
            target_mem_percent: 75.0,
            scale_in_margin_percent: 10.0,
            scale_out_cooldown: Duration::from_secs(60),
            scale_in_cooldown: Duration::from_secs(300),
        }
    }
}

impl ScalingPolicy {
    /// Clamps a worker count into `[min_capacity, max_capacity]`
    pub fn bound(&self, count: u32) -> u32 {
        count.max(self.min_capacity).min(self.max_capacity)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_capacity > self.max_capacity {
            return Err(format!(
                "min_capacity ({}) cannot exceed max_capacity ({})",
                self.min_capacity, self.max_capacity
            ));
        }

        if !(self.target_cpu_percent > 0.0 && self.target_cpu_percent <= 100.0) {
            return Err("target_cpu_percent must be in (0, 100]".to_string());
        }

        if !(self.target_mem_percent > 0.0 && self.target_mem_percent <= 100.0) {
            return Err("target_mem_percent must be in (0, 100]".to_string());
        }

        if !(0.0..100.0).contains(&self.scale_in_margin_percent) {
            return Err("scale_in_margin_percent must be in [0, 100)".to_string());
        }

        Ok(())
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingDecision {
    /// No action needed
    NoChange { current: u32 },
    ScaleUp { from: u32, to: u32, reason: String },
    ScaleDown { from: u32, to: u32, reason: String },
}

impl ScalingDecision {
    /// Desired count after applying the decision
    pub fn target(&self) -> u32 {
        match self {
            ScalingDecision::NoChange { current } => *current,
            ScalingDecision::ScaleUp { to, .. } | ScalingDecision::ScaleDown { to, .. } => *to,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, ScalingDecision::NoChange { .. })
    }
}

fn proposal(current: u32, observed: f64, target: f64) -> u32 {
    // `as` saturates: NaN and negatives become 0, overflow becomes u32::MAX
    (current as f64 * observed / target).ceil() as u32
}

/// Compares utilization against the policy and proposes a desired count
///
/// Never returns a target outside `[min_capacity, max_capacity]` for a valid
/// policy.
pub fn evaluate(state: &ServiceState, policy: &ScalingPolicy) -> ScalingDecision {
    let current = state.desired_count;
    let cpu = state.cpu_utilization;
    let mem = state.mem_utilization;

    let cpu_proposal = proposal(current, cpu, policy.target_cpu_percent);
    let mem_proposal = proposal(current, mem, policy.target_mem_percent);
    let combined = cpu_proposal.max(mem_proposal);

    let cpu_high = cpu > policy.target_cpu_percent;
    let mem_high = mem > policy.target_mem_percent;

    let keep = 1.0 - policy.scale_in_margin_percent / 100.0;
    let cpu_low = cpu < policy.target_cpu_percent * keep;
    let mem_low = mem < policy.target_mem_percent * keep;

    let (target, reason) = if cpu_high || mem_high {
        let wanted = combined.max(current.saturating_add(1));
        let reason = match (cpu_high, mem_high) {
            (true, true) => format!(
                "cpu {:.1}% and memory {:.1}% above targets {:.0}%/{:.0}%",
                cpu, mem, policy.target_cpu_percent, policy.target_mem_percent
            ),
            (true, false) => format!(
                "cpu {:.1}% above target {:.0}%",
                cpu, policy.target_cpu_percent
            ),
            _ => format!(
                "memory {:.1}% above target {:.0}%",
                mem, policy.target_mem_percent
            ),
        };
        (policy.bound(wanted), reason)
    } else if cpu_low && mem_low {
        let wanted = combined.min(current.saturating_sub(1));
        let reason = format!(
            "cpu {:.1}% and memory {:.1}% below targets {:.0}%/{:.0}%",
            cpu, mem, policy.target_cpu_percent, policy.target_mem_percent
        );
        (policy.bound(wanted), reason)
    } else {
        (
            policy.bound(current),
            format!("desired count {} outside capacity bounds", current),
        )
    };

    if target > current {
        ScalingDecision::ScaleUp {
            from: current,
            to: target,
            reason,
        }
    } else if target < current {
        ScalingDecision::ScaleDown {
            from: current,
            to: target,
            reason,
        }
    } else {
        ScalingDecision::NoChange { current }
    }
}
