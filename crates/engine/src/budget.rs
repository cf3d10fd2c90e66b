//! Budget, limitation, and validation state-machine helpers.
//!
//! These are pure functions over `RunState`'s durable counters and
//! `RunConfig` — no I/O, so the engine's apply step can call them inline and
//! commit the resulting `RunState` in the same `run_store.update` closure.

use sa_domain::config::RunConfig;
use sa_domain::entities::RunState;

/// Strikes tolerated against a budget-exceeded run before a forced finish.
pub const MAX_BUDGET_STRIKES: u32 = 4;

/// Initial `runIterationLimit`: the configured default, clamped into
/// `[runMinIterations, runMaxIterationsHardCap]`.
pub fn initial_iteration_limit(config: &RunConfig) -> u32 {
    config
        .run_max_iterations
        .max(config.run_min_iterations)
        .min(config.run_max_iterations_hard_cap)
}

pub fn budget_exceeded(action_count: u32, iteration: u32, run_iteration_limit: u32) -> bool {
    action_count > 0 && iteration >= run_iteration_limit
}

/// Record a budget strike on the durable state; the caller force-finishes
/// once this returns `true` (the fourth strike).
pub fn record_strike(state: &mut RunState) -> bool {
    state.budget_strikes += 1;
    state.budget_strikes >= MAX_BUDGET_STRIKES
}

/// Extend the iteration ceiling, clamped to the hard cap.
pub fn extend_limit(config: &RunConfig, requested: u32) -> u32 {
    config.clamp_requested_iterations(requested)
}

/// Whether a tool's failure count has crossed into mandatory limitation.
pub fn exceeds_tool_retries(failure_count: u32, config: &RunConfig) -> bool {
    failure_count > config.run_max_tool_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_limit_respects_hard_cap() {
        let mut cfg = RunConfig::default();
        cfg.run_max_iterations = 9_999;
        assert_eq!(initial_iteration_limit(&cfg), cfg.run_max_iterations_hard_cap);
    }

    #[test]
    fn budget_exceeded_requires_at_least_one_action() {
        assert!(!budget_exceeded(0, 10, 5));
        assert!(budget_exceeded(3, 10, 5));
    }

    #[test]
    fn fourth_strike_signals_force_finish() {
        let mut state = RunState::default();
        assert!(!record_strike(&mut state));
        assert!(!record_strike(&mut state));
        assert!(!record_strike(&mut state));
        assert!(record_strike(&mut state));
    }

    #[test]
    fn tool_retries_trip_after_configured_max() {
        let cfg = RunConfig::default();
        assert!(!exceeds_tool_retries(cfg.run_max_tool_retries, &cfg));
        assert!(exceeds_tool_retries(cfg.run_max_tool_retries + 1, &cfg));
    }
}
