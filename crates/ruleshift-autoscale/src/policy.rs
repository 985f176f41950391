//! Scaling policy catalog.
//!
//! Three intensity tiers map the current replica count to a new target,
//! each with an up and a down function. Every step moves by at least one
//! replica. A separate proportional function drives corrective descent
//! toward a desired usage level.

use std::fmt;

use ruleshift_rules::Limits;

/// Scaling intensity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Mild,
    Medium,
    Strong,
}

impl Policy {
    /// Up and down multipliers of this tier.
    fn factors(self) -> (f64, f64) {
        match self {
            Self::Mild => (1.15, 0.85),
            Self::Medium => (1.30, 0.70),
            Self::Strong => (1.50, 0.50),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Medium => "medium",
            Self::Strong => "strong",
        }
    }

    /// `max(r + 1, r * up_factor)`
    pub fn up(self, replicas: u32) -> f64 {
        let r = f64::from(replicas);
        (r + 1.0).max(r * self.factors().0)
    }

    /// `min(max(0, r - 1), r * down_factor)`
    pub fn down(self, replicas: u32) -> f64 {
        let r = f64::from(replicas);
        (r - 1.0).max(0.0).min(r * self.factors().1)
    }
}

/// `replicas * limit / desired`. A zero `desired` leaves replicas unchanged.
pub fn proportional_down(replicas: u32, limit: f64, desired: f64) -> f64 {
    let r = f64::from(replicas);
    if desired == 0.0 {
        return r;
    }
    r * (limit / desired)
}

/// What a firing rule does, selected by the violation-count slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    Up(Policy),
    ProportionalDown,
    Hold,
}

impl ScaleAction {
    /// `> 1` strong, `(0.5, 1]` medium, `(0, 0.5]` mild, `< 0` proportional
    /// descent, `0` hold.
    pub fn for_slope(slope: f64) -> Self {
        if slope > 1.0 {
            Self::Up(Policy::Strong)
        } else if slope > 0.5 {
            Self::Up(Policy::Medium)
        } else if slope > 0.0 {
            Self::Up(Policy::Mild)
        } else if slope < 0.0 {
            Self::ProportionalDown
        } else {
            Self::Hold
        }
    }

    /// Unclamped replica target for `replicas`.
    pub fn apply(self, replicas: u32, limits: &Limits) -> f64 {
        match self {
            Self::Up(policy) => policy.up(replicas),
            Self::ProportionalDown => proportional_down(
                replicas,
                limits.lower_limit.as_milli_f64(),
                limits.desired_usage.as_milli_f64(),
            ),
            Self::Hold => f64::from(replicas),
        }
    }
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up(policy) => write!(f, "{} up", policy.name()),
            Self::ProportionalDown => f.write_str("proportional down"),
            Self::Hold => f.write_str("hold"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruleshift_rules::Quantity;

    fn limits(lower: i64, desired: i64) -> Limits {
        Limits {
            upper_limit: Quantity::from_units(100),
            lower_limit: Quantity::from_units(lower),
            desired_usage: Quantity::from_units(desired),
            max_violation_count: 5.0,
        }
    }

    #[test]
    fn mild_tier() {
        assert_eq!(Policy::Mild.up(10), 11.5);
        assert_eq!(Policy::Mild.down(10), 8.5);
    }

    #[test]
    fn medium_and_strong_tiers() {
        assert_eq!(Policy::Medium.up(10), 13.0);
        assert_eq!(Policy::Medium.down(10), 7.0);
        assert_eq!(Policy::Strong.up(10), 15.0);
        assert_eq!(Policy::Strong.down(10), 5.0);
    }

    #[test]
    fn small_counts_move_by_at_least_one() {
        assert_eq!(Policy::Mild.up(2), 3.0);
        assert_eq!(Policy::Strong.up(0), 1.0);
        assert_eq!(Policy::Mild.down(2), 1.0);
        assert_eq!(Policy::Strong.down(0), 0.0);
    }

    #[test]
    fn proportional_down_scales_by_ratio() {
        assert_eq!(proportional_down(10, 20.0, 50.0), 4.0);
        assert_eq!(proportional_down(10, 20.0, 0.0), 10.0);
    }

    #[test]
    fn slope_selects_tier() {
        assert_eq!(ScaleAction::for_slope(1.5), ScaleAction::Up(Policy::Strong));
        assert_eq!(ScaleAction::for_slope(1.0), ScaleAction::Up(Policy::Medium));
        assert_eq!(ScaleAction::for_slope(0.8), ScaleAction::Up(Policy::Medium));
        assert_eq!(ScaleAction::for_slope(0.5), ScaleAction::Up(Policy::Mild));
        assert_eq!(ScaleAction::for_slope(0.1), ScaleAction::Up(Policy::Mild));
        assert_eq!(ScaleAction::for_slope(0.0), ScaleAction::Hold);
        assert_eq!(ScaleAction::for_slope(-0.2), ScaleAction::ProportionalDown);
    }

    #[test]
    fn apply_uses_lower_limit_and_desired_usage() {
        let l = limits(30, 60);
        assert_eq!(ScaleAction::ProportionalDown.apply(8, &l), 4.0);
        assert_eq!(ScaleAction::Up(Policy::Mild).apply(10, &l), 11.5);
        assert_eq!(ScaleAction::Hold.apply(7, &l), 7.0);
    }

    #[test]
    fn action_display_names_the_tier() {
        assert_eq!(ScaleAction::Up(Policy::Medium).to_string(), "medium up");
        assert_eq!(ScaleAction::ProportionalDown.to_string(), "proportional down");
        assert_eq!(ScaleAction::Hold.to_string(), "hold");
    }
}
