//! Run + step persistence.
//!
//! Uses an `RwLock<Inner>` with an O(1) index by id. The run engine needs
//! durable storage for the lifetime of a run rather than a bounded display
//! ring, so no eviction runs against this map; the
//! `RwLock`-guarded interior and the `update()`-with-closure idiom are kept.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use sa_domain::entities::{Run, RunStatus, RunStep};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("run not found")]
    NotFound,
    #[error("run is not pending (status: {0:?})")]
    NotPending(RunStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppendStepError {
    #[error("run not found")]
    RunNotFound,
    #[error("idempotency key already used for this run")]
    DuplicateIdempotencyKey,
}

struct Inner {
    runs: HashMap<Uuid, Run>,
    steps: HashMap<Uuid, Vec<RunStep>>,
    /// (run_id, idempotency_key) -> seq, for O(1) duplicate-append rejection.
    idempotency_index: HashMap<(Uuid, String), u64>,
    /// parent_run_id -> child run ids, preserving spawn order.
    children_index: HashMap<Uuid, Vec<Uuid>>,
}

pub struct RunStore {
    inner: RwLock<Inner>,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                runs: HashMap::new(),
                steps: HashMap::new(),
                idempotency_index: HashMap::new(),
                children_index: HashMap::new(),
            }),
        }
    }

    /// Insert a freshly-built run (status `pending`). Returns its id.
    pub fn insert(&self, run: Run) -> Uuid {
        let id = run.id;
        let mut inner = self.inner.write();
        if let Some(parent_id) = run.parent_run_id {
            inner.children_index.entry(parent_id).or_default().push(id);
        }
        inner.runs.insert(id, run);
        inner.steps.insert(id, Vec::new());
        id
    }

    pub fn get(&self, run_id: Uuid) -> Option<Run> {
        self.inner.read().runs.get(&run_id).cloned()
    }

    pub fn children(&self, parent_run_id: Uuid) -> Vec<Run> {
        let inner = self.inner.read();
        inner
            .children_index
            .get(&parent_run_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect()
    }

    /// Conditional claim: `pending -> running`, the only legal entry into
    /// execution. Rejects a claim on any other status so two workers can
    /// never both believe they own the same run.
    pub fn claim(&self, run_id: Uuid) -> Result<Run, ClaimError> {
        let mut inner = self.inner.write();
        let run = inner.runs.get_mut(&run_id).ok_or(ClaimError::NotFound)?;
        if run.status != RunStatus::Pending {
            return Err(ClaimError::NotPending(run.status));
        }
        run.status = RunStatus::Running;
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    /// Rewrite the run in place. `inputJson.state` and every other field are
    /// always replaced wholesale, so callers
    /// pass the fully-updated `Run` from a `get()` + mutate round-trip.
    pub fn update(&self, run_id: Uuid, f: impl FnOnce(&mut Run)) -> bool {
        let mut inner = self.inner.write();
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return false;
        };
        f(run);
        run.updated_at = Utc::now();
        true
    }

    /// Append a step, assigning the next `seq` and rejecting replays of the
    /// same `idempotencyKey` for this run.
    pub fn append_step(&self, run_id: Uuid, mut step: RunStep) -> Result<RunStep, AppendStepError> {
        let mut inner = self.inner.write();
        if !inner.runs.contains_key(&run_id) {
            return Err(AppendStepError::RunNotFound);
        }
        let idem_key = (run_id, step.idempotency_key.clone());
        if inner.idempotency_index.contains_key(&idem_key) {
            return Err(AppendStepError::DuplicateIdempotencyKey);
        }
        let steps = inner.steps.entry(run_id).or_default();
        let seq = steps.len() as u64;
        step.run_id = run_id;
        step.seq = seq;
        steps.push(step.clone());
        inner.idempotency_index.insert(idem_key, seq);
        Ok(step)
    }

    pub fn steps(&self, run_id: Uuid) -> Vec<RunStep> {
        self.inner.read().steps.get(&run_id).cloned().unwrap_or_default()
    }

    /// Cascade-cancel a run and every transitively-spawned descendant that
    /// is not already in a terminal state. Returns the ids cancelled.
    pub fn cascade_cancel(&self, root_run_id: Uuid) -> Vec<Uuid> {
        let mut inner = self.inner.write();
        let mut cancelled = Vec::new();
        let mut stack = vec![root_run_id];
        while let Some(id) = stack.pop() {
            if let Some(children) = inner.children_index.get(&id) {
                stack.extend(children.iter().copied());
            }
            if let Some(run) = inner.runs.get_mut(&id) {
                if !run.status.is_terminal() {
                    run.status = RunStatus::Cancelled;
                    run.updated_at = Utc::now();
                    cancelled.push(id);
                }
            }
        }
        cancelled
    }
}
