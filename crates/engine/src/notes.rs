//! Note / rationale / action protocol bookkeeping for a single claimed run.
//!
//! Lives in memory for the duration of one engine invocation (claim through
//! terminal-or-waiting) and is rehydrated from the step log on re-claim, so
//! a woken run is not forced to re-record notes it already wrote. Persisted
//! block/strike counters live on `RunState` instead (see `sa_domain::entities::RunState`).

use crate::similarity::{
    jaccard_similarity, looks_like_artifact_note, looks_like_coordinator_plan,
    looks_like_plan_note, looks_like_requirements_note, mentions_tool, task_hints_at_tools,
};
use sa_domain::command::NoteCategory;
use sa_domain::entities::{RunRole, RunStep, StepType};

/// A requirements note this close to the task text is a restatement, not a
/// specification.
const TASK_RESTATEMENT_SIMILARITY: f64 = 0.8;

#[derive(Debug, Default)]
pub struct NoteTracker {
    requirements: Option<String>,
    plan: Option<String>,
    artifact: Option<String>,
    validation: Option<String>,
    /// Set once an artifact note has been recorded and not yet consumed by
    /// an action.
    pub rationale_ready: bool,
    /// Notes emitted back-to-back since the last action.
    pub consecutive_notes: u32,
    /// `finish` attempts blocked for missing requirements/plan notes.
    pub blocked_finish_attempts: u32,
    /// Categories that already received a rewrite request; the request is
    /// idempotent per category, so repeat rejections stay silent.
    rejected: Vec<NoteCategory>,
}

pub enum NoteOutcome {
    Accepted {
        /// The plan already existed and was replaced — feeds the plan-loop
        /// detector.
        plan_rewrite: bool,
    },
    /// Rejected for not satisfying the category's shape check. `repeat` is
    /// `true` when this category was already asked for a rewrite; the caller
    /// emits the rewrite request only once.
    RejectedShape { repeat: bool },
    /// Artifact note too similar to requirements/plan (Jaccard >= 0.6).
    RejectedSimilar { repeat: bool },
}

impl NoteTracker {
    /// Rebuild from a run's existing step log, so a re-claimed run keeps the
    /// notes it recorded before suspending.
    pub fn rehydrate(steps: &[RunStep]) -> Self {
        let mut tracker = Self::default();
        for step in steps.iter().filter(|s| s.kind == StepType::Note) {
            let Some(result) = step.result_json.as_ref() else {
                continue;
            };
            let Some(category) = result
                .get("category")
                .and_then(|c| serde_json::from_value::<NoteCategory>(c.clone()).ok())
            else {
                continue;
            };
            let content = result.get("content").and_then(|c| c.as_str()).unwrap_or_default();
            match category {
                NoteCategory::Requirements => tracker.requirements = Some(content.to_string()),
                NoteCategory::Plan => tracker.plan = Some(content.to_string()),
                NoteCategory::Artifact => tracker.artifact = Some(content.to_string()),
                NoteCategory::Validation => tracker.validation = Some(content.to_string()),
            }
        }
        tracker
    }

    pub fn has_requirements(&self) -> bool {
        self.requirements.is_some()
    }

    pub fn has_plan(&self) -> bool {
        self.plan.is_some()
    }

    pub fn has_artifact(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn has_validation(&self) -> bool {
        self.validation.is_some()
    }

    /// All three prelude notes exist — the gate heavyweight coordinator
    /// actions (tool calls, spawns) must pass.
    pub fn prelude_complete(&self) -> bool {
        self.has_requirements() && self.has_plan() && self.has_artifact()
    }

    pub fn requirements_text(&self) -> Option<&str> {
        self.requirements.as_deref()
    }

    pub fn plan_text(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    fn mark_rejected(&mut self, category: NoteCategory) -> bool {
        let repeat = self.rejected.contains(&category);
        if !repeat {
            self.rejected.push(category);
        }
        repeat
    }

    /// Record a note, returning whether it was accepted by the shape/
    /// similarity checks for `role`. Rejected notes do not count toward
    /// `consecutive_notes` or flip `rationale_ready`.
    pub fn record(
        &mut self,
        category: NoteCategory,
        content: &str,
        role: RunRole,
        task: &str,
    ) -> NoteOutcome {
        let mut plan_rewrite = false;
        match category {
            NoteCategory::Requirements => {
                if !looks_like_requirements_note(content)
                    || jaccard_similarity(content, task) >= TASK_RESTATEMENT_SIMILARITY
                {
                    return NoteOutcome::RejectedShape { repeat: self.mark_rejected(category) };
                }
                self.requirements = Some(content.to_string());
            }
            NoteCategory::Plan => {
                let shape_ok = match role {
                    RunRole::Coordinator => looks_like_coordinator_plan(content),
                    RunRole::Subagent | RunRole::Subsubagent => {
                        looks_like_plan_note(content)
                            && (!task_hints_at_tools(task) || mentions_tool(content))
                    }
                };
                if !shape_ok {
                    return NoteOutcome::RejectedShape { repeat: self.mark_rejected(category) };
                }
                plan_rewrite = self.plan.is_some();
                self.plan = Some(content.to_string());
            }
            NoteCategory::Artifact => {
                if !looks_like_artifact_note(content) {
                    return NoteOutcome::RejectedShape { repeat: self.mark_rejected(category) };
                }
                let req_sim = self
                    .requirements
                    .as_deref()
                    .map(|r| jaccard_similarity(r, content))
                    .unwrap_or(0.0);
                let plan_sim = self
                    .plan
                    .as_deref()
                    .map(|p| jaccard_similarity(p, content))
                    .unwrap_or(0.0);
                if req_sim >= 0.6 || plan_sim >= 0.6 {
                    return NoteOutcome::RejectedSimilar { repeat: self.mark_rejected(category) };
                }
                self.artifact = Some(content.to_string());
                self.rationale_ready = true;
            }
            NoteCategory::Validation => {
                self.validation = Some(content.to_string());
            }
        }
        self.consecutive_notes += 1;
        NoteOutcome::Accepted { plan_rewrite }
    }

    /// Called when an action command is about to be applied: clears the
    /// rationale-ready flag and the consecutive-note counter.
    pub fn consume_for_action(&mut self) {
        self.rationale_ready = false;
        self.consecutive_notes = 0;
    }

    /// Coordinators may fabricate fallback notes after repeated blocked
    /// finish attempts to avoid deadlock.
    pub fn fabricate_fallback(&mut self, task: &str) {
        if self.requirements.is_none() {
            self.requirements = Some(format!(
                "Output must directly answer the request; success criteria: addresses \"{task}\"."
            ));
        }
        if self.plan.is_none() {
            self.plan = Some("1. review available context\n2. produce the best-effort answer".into());
        }
    }

    /// Record a `finish` attempt blocked for missing requirements/plan
    /// notes; returns `true` once the caller should fabricate fallback
    /// notes instead of blocking further (after the second attempt).
    pub fn record_blocked_finish(&mut self) -> bool {
        self.blocked_finish_attempts += 1;
        self.blocked_finish_attempts >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::entities::StepStatus;
    use uuid::Uuid;

    const TASK: &str = "what's the weather in Bremen tomorrow?";

    fn coordinator_plan() -> &'static str {
        "1. queue_op push the open questions\n\
         2. spawn_subagent for the weather lookup with full context\n\
         3. review the result against the success criteria\n\
         4. deliver_subagent_output to the user\n\
         5. confirm the output format matches the request"
    }

    #[test]
    fn requires_shape_before_accepting() {
        let mut tracker = NoteTracker::default();
        assert!(matches!(
            tracker.record(NoteCategory::Requirements, "the user wants weather", RunRole::Subagent, TASK),
            NoteOutcome::RejectedShape { repeat: false }
        ));
        assert!(matches!(
            tracker.record(
                NoteCategory::Requirements,
                "output must be a short weather summary meeting the success criteria",
                RunRole::Subagent,
                TASK,
            ),
            NoteOutcome::Accepted { .. }
        ));
        assert!(tracker.has_requirements());
    }

    #[test]
    fn rewrite_request_is_idempotent_per_category() {
        let mut tracker = NoteTracker::default();
        assert!(matches!(
            tracker.record(NoteCategory::Requirements, "nope", RunRole::Subagent, TASK),
            NoteOutcome::RejectedShape { repeat: false }
        ));
        assert!(matches!(
            tracker.record(NoteCategory::Requirements, "still nope", RunRole::Subagent, TASK),
            NoteOutcome::RejectedShape { repeat: true }
        ));
    }

    #[test]
    fn coordinator_plan_is_held_to_the_fuller_shape() {
        let mut tracker = NoteTracker::default();
        assert!(matches!(
            tracker.record(NoteCategory::Plan, "1. look it up\n2. reply", RunRole::Coordinator, TASK),
            NoteOutcome::RejectedShape { .. }
        ));
        assert!(matches!(
            tracker.record(NoteCategory::Plan, coordinator_plan(), RunRole::Coordinator, TASK),
            NoteOutcome::Accepted { plan_rewrite: false }
        ));
    }

    #[test]
    fn subagent_plan_must_mention_a_tool_when_task_hints_at_one() {
        let mut tracker = NoteTracker::default();
        let task = "look up the weather in Bremen";
        assert!(matches!(
            tracker.record(NoteCategory::Plan, "1. think about it\n2. reply", RunRole::Subagent, task),
            NoteOutcome::RejectedShape { .. }
        ));
        assert!(matches!(
            tracker.record(NoteCategory::Plan, "1. call weather.get\n2. summarise", RunRole::Subagent, task),
            NoteOutcome::Accepted { .. }
        ));
    }

    #[test]
    fn second_accepted_plan_reports_a_rewrite() {
        let mut tracker = NoteTracker::default();
        let task = "say hello";
        assert!(matches!(
            tracker.record(NoteCategory::Plan, "1. draft\n2. send", RunRole::Subagent, task),
            NoteOutcome::Accepted { plan_rewrite: false }
        ));
        assert!(matches!(
            tracker.record(NoteCategory::Plan, "1. rethink\n2. send again", RunRole::Subagent, task),
            NoteOutcome::Accepted { plan_rewrite: true }
        ));
    }

    #[test]
    fn artifact_too_similar_to_plan_is_rejected() {
        let mut tracker = NoteTracker::default();
        tracker.record(
            NoteCategory::Requirements,
            "output must be a short weather summary meeting the success criteria",
            RunRole::Subagent,
            TASK,
        );
        tracker.record(NoteCategory::Plan, "1. call weather.get\n2. summarise the result", RunRole::Subagent, TASK);
        assert!(matches!(
            tracker.record(NoteCategory::Artifact, "call weather.get summarise the result", RunRole::Subagent, TASK),
            NoteOutcome::RejectedSimilar { .. }
        ));
    }

    #[test]
    fn distinct_artifact_note_sets_rationale_ready() {
        let mut tracker = NoteTracker::default();
        tracker.record(
            NoteCategory::Requirements,
            "output must be a short weather summary meeting the success criteria",
            RunRole::Subagent,
            TASK,
        );
        tracker.record(NoteCategory::Plan, "1. call weather.get\n2. summarise the result", RunRole::Subagent, TASK);
        assert!(matches!(
            tracker.record(NoteCategory::Artifact, "Next I will invoke the forecast lookup for Bremen.", RunRole::Subagent, TASK),
            NoteOutcome::Accepted { .. }
        ));
        assert!(tracker.rationale_ready);
        assert!(tracker.prelude_complete());
    }

    #[test]
    fn rehydrate_restores_notes_from_step_log() {
        let run_id = Uuid::new_v4();
        let steps = vec![
            crate::steps::note_step(run_id, NoteCategory::Requirements, "output must match the criteria"),
            crate::steps::note_step(run_id, NoteCategory::Plan, "1. do the thing"),
            crate::steps::note_step(run_id, NoteCategory::Artifact, "Next I gather the data."),
            RunStep::new(run_id, StepType::Decision, StepStatus::Completed, "other"),
        ];
        let tracker = NoteTracker::rehydrate(&steps);
        assert!(tracker.prelude_complete());
        assert!(!tracker.rationale_ready);
        assert!(!tracker.has_validation());
    }
}
