//! Trigger dispatcher: scans due `Trigger` rows on a fixed cadence and
//! enqueues exactly one `wake` (for `run_wake`) or `run` (for `cron`) job
//! per fire, with missed-window handling and a per-trigger concurrency
//! guard. The contract is deliberately small: fire at or after
//! `nextFireAt`, enqueue a `wake` or `run` job, reschedule or disable.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use sa_domain::entities::{Run, Trigger, TriggerType};
use sa_queue::{ConcurrencyGuard, Job, QueueName, QueueStore};
use sa_store::RunStore;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedPolicy {
    /// Drop the missed run silently once more than one window was missed.
    Skip,
    /// Fire exactly once, no matter how many windows were missed.
    RunOnce,
    /// Fire once per missed window, up to `maxCatchupRuns`.
    CatchUp,
}

/// A cron trigger's `specJson` payload: the schedule plus what to spawn.
#[derive(Debug, Clone, Deserialize)]
struct CronSpec {
    cron: String,
    #[serde(default = "default_missed_policy")]
    missed_policy: MissedPolicy,
    #[serde(default = "default_max_catchup")]
    max_catchup_runs: usize,
    tenant_id: String,
    agent_id: String,
    user_id: String,
    channel_id: String,
    prompt: String,
}

fn default_missed_policy() -> MissedPolicy {
    MissedPolicy::RunOnce
}
fn default_max_catchup() -> usize {
    3
}

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_matches_naive(cron: &str, dt: &NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Next UTC occurrence of `cron` strictly after `after`.
pub fn cron_next(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut candidate = after.naive_utc() + chrono::Duration::seconds(60 - after.second() as i64);
    candidate = candidate.with_second(0).unwrap_or(candidate);
    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if cron_matches_naive(cron, &candidate) {
            return Some(DateTime::from_naive_utc_and_offset(candidate, Utc));
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

/// How many cron windows were missed between `last_fire_at` and `now`.
pub fn missed_window_count(cron: &str, last_fire_at: DateTime<Utc>, now: &DateTime<Utc>, max_catchup: usize) -> usize {
    let mut count = 0usize;
    let mut cursor = last_fire_at;
    loop {
        match cron_next(cron, &cursor) {
            Some(next) if next <= *now => {
                count += 1;
                cursor = next;
                if count > max_catchup {
                    break;
                }
            }
            _ => break,
        }
    }
    count
}

pub fn runs_to_fire(policy: MissedPolicy, cron: &str, last_fire_at: DateTime<Utc>, now: &DateTime<Utc>, max_catchup: usize) -> usize {
    let missed = missed_window_count(cron, last_fire_at, now, max_catchup);
    match policy {
        MissedPolicy::Skip => {
            if missed > 1 {
                0
            } else {
                missed
            }
        }
        MissedPolicy::RunOnce => missed.min(1),
        MissedPolicy::CatchUp => missed.min(max_catchup),
    }
}

pub struct TriggerDispatcher {
    /// Per-trigger single-flight guard, preventing overlapping dispatches
    /// of the same trigger when a tick runs long.
    pub concurrency: ConcurrencyGuard,
}

impl TriggerDispatcher {
    pub fn new() -> Self {
        Self { concurrency: ConcurrencyGuard::new() }
    }

    /// One scan: fire every due, enabled trigger and reschedule it.
    pub async fn tick(&self, triggers: &sa_store::TriggerStore, run_store: &RunStore, queue_store: &QueueStore) {
        let now = Utc::now();
        for trigger in triggers.due(now) {
            if !self.concurrency.try_acquire(trigger.id, 1).await {
                continue;
            }
            match trigger.kind {
                TriggerType::RunWake => {
                    self.fire_run_wake(&trigger, queue_store).await;
                    triggers.disable(trigger.id);
                }
                TriggerType::Cron => {
                    self.fire_cron(&trigger, triggers, run_store, queue_store, now).await;
                }
            }
            self.concurrency.release(trigger.id).await;
        }
    }

    async fn fire_run_wake(&self, trigger: &Trigger, queue_store: &QueueStore) {
        let Some(run_id) = trigger.spec_json.get("runId").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok()) else {
            return;
        };
        let job = Job::new(QueueName::Wake, serde_json::json!({ "type": "wake", "runId": run_id, "reason": "trigger" }), Utc::now());
        queue_store.enqueue(job).await;
    }

    async fn fire_cron(&self, trigger: &Trigger, triggers: &sa_store::TriggerStore, run_store: &RunStore, queue_store: &QueueStore, now: DateTime<Utc>) {
        let Ok(spec) = serde_json::from_value::<CronSpec>(trigger.spec_json.clone()) else {
            triggers.disable(trigger.id);
            return;
        };
        let n = runs_to_fire(spec.missed_policy, &spec.cron, trigger.next_fire_at, &now, spec.max_catchup_runs);
        for _ in 0..n {
            let run = Run::new_coordinator(&spec.tenant_id, &spec.agent_id, &spec.user_id, &spec.channel_id, &spec.prompt);
            let run_id = run_store.insert(run);
            let job = Job::new(
                QueueName::Runs,
                serde_json::json!({ "type": "run", "runId": run_id, "tenantId": spec.tenant_id, "agentId": spec.agent_id }),
                Utc::now(),
            );
            queue_store.enqueue(job).await;
        }
        if let Some(next) = cron_next(&spec.cron, &now) {
            triggers.reschedule(trigger.id, next);
        } else {
            triggers.disable(trigger.id);
        }
    }
}

impl Default for TriggerDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
