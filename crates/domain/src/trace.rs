use serde::Serialize;

/// Structured trace events emitted by the run engine, queue workers, and
/// trigger dispatcher. Each variant mirrors an event step payload
/// so a trace line and the corresponding `RunStep::Event` carry the same
/// shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RunClaimed {
        run_id: uuid::Uuid,
        worker_id: String,
    },
    IterationStarted {
        run_id: uuid::Uuid,
        iteration: u32,
    },
    CommandParsed {
        run_id: uuid::Uuid,
        command_type: String,
        loose_parse_used: bool,
    },
    ParseRetryExhausted {
        run_id: uuid::Uuid,
        attempts: u32,
    },
    ToolInvoked {
        run_id: uuid::Uuid,
        tool_name: String,
        duration_ms: u64,
        ok: bool,
    },
    PolicyDecided {
        run_id: uuid::Uuid,
        tool_name: String,
        decision: String,
    },
    SubagentSpawned {
        parent_run_id: uuid::Uuid,
        child_run_id: uuid::Uuid,
        agent_level: u8,
    },
    LoopDetected {
        run_id: uuid::Uuid,
        kind: String,
    },
    BudgetDecision {
        run_id: uuid::Uuid,
        action: String,
        strikes: u32,
    },
    MemoryWriteSkipped {
        agent_id: String,
        reason: String,
    },
    MemoryItemsWritten {
        agent_id: String,
        module: String,
        count: usize,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    TriggerFired {
        trigger_id: uuid::Uuid,
        agent_id: String,
        kind: String,
    },
    RunCompleted {
        run_id: uuid::Uuid,
        status: String,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
