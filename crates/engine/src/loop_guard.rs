//! Anti-loop detectors: the 3-window repetition guard, duplicate tool-call
//! signatures, duplicate spawn signatures, and plan-rewrite tracking.
//!
//! Like `notes::NoteTracker`, this lives in memory for the lifetime of one
//! engine invocation; the durable counters it feeds (`system_note_count`,
//! `plan_rewrite_count`, `blocked_spawn_count`) live on `RunState`.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    pub had_tool_call: bool,
    pub output_snapshot: String,
    pub command_signature: String,
}

#[derive(Debug, Default)]
pub struct LoopGuard {
    window: VecDeque<IterationSnapshot>,
    tool_signature_counts: HashMap<String, u32>,
    last_tool_result_signature: Option<String>,
    repeated_tool_result_signature: bool,
    spawn_signatures: std::collections::HashSet<String>,
    /// `profile:task` keys of spawns recorded in the step log before this
    /// claim, so a re-claimed parent can't re-issue an old delegation.
    historical_spawn_keys: std::collections::HashSet<String>,
    last_finish_output: Option<String>,
    tool_failure_counts: HashMap<String, u32>,
    last_validated_output: Option<String>,
}

pub enum ToolLoopVerdict {
    Ok,
    /// Third (or later) identical `(name, args)` signature: terminal.
    LoopDetected,
}

impl LoopGuard {
    pub fn push_iteration(&mut self, snapshot: IterationSnapshot) {
        self.window.push_back(snapshot);
        while self.window.len() > 3 {
            self.window.pop_front();
        }
    }

    /// `true` when the last three iterations all lacked a tool call, share
    /// an identical output snapshot, and share a single command signature.
    pub fn is_pointless_loop(&self) -> bool {
        if self.window.len() < 3 {
            return false;
        }
        let first = &self.window[0];
        self.window.iter().all(|s| {
            !s.had_tool_call
                && s.output_snapshot == first.output_snapshot
                && s.command_signature == first.command_signature
        })
    }

    /// `true` when the last three iterations were all tool-call-free with
    /// an identical output — the "extended the budget but showed no
    /// progress" check, looser than [`Self::is_pointless_loop`] since it
    /// ignores the command signature.
    pub fn has_shown_no_progress(&self) -> bool {
        if self.window.len() < 3 {
            return false;
        }
        let first_output = &self.window[0].output_snapshot;
        self.window
            .iter()
            .all(|s| !s.had_tool_call && &s.output_snapshot == first_output)
    }

    /// Count a tool-call signature occurrence; more than two identical
    /// signatures is a terminal loop.
    pub fn record_tool_signature(&mut self, signature: &str) -> ToolLoopVerdict {
        let count = self.tool_signature_counts.entry(signature.to_string()).or_insert(0);
        *count += 1;
        if *count > 2 {
            ToolLoopVerdict::LoopDetected
        } else {
            ToolLoopVerdict::Ok
        }
    }

    /// Returns `true` if this `(name, args, result)` signature repeats the
    /// immediately preceding tool result — two in a row sets
    /// `limitationRequired` on the caller's side.
    pub fn record_tool_result_signature(&mut self, signature: &str) -> bool {
        let repeated = self.last_tool_result_signature.as_deref() == Some(signature);
        self.repeated_tool_result_signature = repeated;
        self.last_tool_result_signature = Some(signature.to_string());
        repeated
    }

    /// Seed a `profile:task` key from a historical `spawn_subagents` event
    /// step, recorded during a previous claim of the same run.
    pub fn seed_historical_spawn(&mut self, key: &str) {
        self.historical_spawn_keys.insert(key.to_string());
    }

    /// `true` if this spawn signature (over `{profile, task, tools, context,
    /// agentLevel}`) has already been seen in this run, or its
    /// `profile:task` key matches a historical spawn event.
    pub fn is_duplicate_spawn(&mut self, signature: &str, historical_key: &str) -> bool {
        if self.historical_spawn_keys.contains(historical_key) {
            return true;
        }
        !self.spawn_signatures.insert(signature.to_string())
    }

    /// `true` when this final output was already emitted once before
    /// (`finish_repeat_forced`).
    pub fn repeats_last_finish(&mut self, output: &str) -> bool {
        let repeats = self.last_finish_output.as_deref() == Some(output);
        self.last_finish_output = Some(output.to_string());
        repeats
    }

    /// Record a failed tool-call signature, returning the new failure count
    /// for that tool. Keyed on the `name` half of the signature only, so
    /// retries with different arguments against the same tool still count
    /// toward `runMaxToolRetries`.
    pub fn record_tool_failure(&mut self, tool_name: &str) -> u32 {
        let count = self.tool_failure_counts.entry(tool_name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// `true` when `output` is identical to the last draft already run
    /// through the validator — the "repeated output bypasses validation"
    /// case. Records `output` as the new last-validated draft either way.
    pub fn is_repeat_validated_output(&mut self, output: &str) -> bool {
        let repeats = self.last_validated_output.as_deref() == Some(output);
        self.last_validated_output = Some(output.to_string());
        repeats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tool: bool, out: &str, sig: &str) -> IterationSnapshot {
        IterationSnapshot {
            had_tool_call: tool,
            output_snapshot: out.into(),
            command_signature: sig.into(),
        }
    }

    #[test]
    fn pointless_loop_needs_three_identical_tool_free_iterations() {
        let mut guard = LoopGuard::default();
        guard.push_iteration(snap(false, "same", "note:plan"));
        guard.push_iteration(snap(false, "same", "note:plan"));
        assert!(!guard.is_pointless_loop());
        guard.push_iteration(snap(false, "same", "note:plan"));
        assert!(guard.is_pointless_loop());
    }

    #[test]
    fn pointless_loop_breaks_on_tool_call() {
        let mut guard = LoopGuard::default();
        guard.push_iteration(snap(false, "same", "note:plan"));
        guard.push_iteration(snap(true, "same", "note:plan"));
        guard.push_iteration(snap(false, "same", "note:plan"));
        assert!(!guard.is_pointless_loop());
    }

    #[test]
    fn third_identical_tool_signature_trips_loop_detection() {
        let mut guard = LoopGuard::default();
        assert!(matches!(guard.record_tool_signature("weather.get:{}"), ToolLoopVerdict::Ok));
        assert!(matches!(guard.record_tool_signature("weather.get:{}"), ToolLoopVerdict::Ok));
        assert!(matches!(
            guard.record_tool_signature("weather.get:{}"),
            ToolLoopVerdict::LoopDetected
        ));
    }

    #[test]
    fn no_progress_ignores_command_signature() {
        let mut guard = LoopGuard::default();
        guard.push_iteration(snap(false, "same", "note:requirements"));
        guard.push_iteration(snap(false, "same", "note:plan"));
        guard.push_iteration(snap(false, "same", "set_run_limits"));
        assert!(guard.has_shown_no_progress());
    }

    #[test]
    fn duplicate_spawn_signature_detected_on_second_occurrence() {
        let mut guard = LoopGuard::default();
        assert!(!guard.is_duplicate_spawn("auto_tool:weather:::1", "auto_tool:weather"));
        assert!(guard.is_duplicate_spawn("auto_tool:weather:::1", "auto_tool:weather"));
    }

    #[test]
    fn historical_spawn_key_blocks_reissue_across_claims() {
        let mut guard = LoopGuard::default();
        guard.seed_historical_spawn("researcher:find sources");
        assert!(guard.is_duplicate_spawn("researcher:find sources:::1", "researcher:find sources"));
    }

    #[test]
    fn tool_failure_count_accumulates_per_tool_name() {
        let mut guard = LoopGuard::default();
        assert_eq!(guard.record_tool_failure("weather.get"), 1);
        assert_eq!(guard.record_tool_failure("weather.get"), 2);
        assert_eq!(guard.record_tool_failure("other.tool"), 1);
    }

    #[test]
    fn repeated_validated_output_is_detected_on_second_pass() {
        let mut guard = LoopGuard::default();
        assert!(!guard.is_repeat_validated_output("same answer"));
        assert!(guard.is_repeat_validated_output("same answer"));
    }
}
