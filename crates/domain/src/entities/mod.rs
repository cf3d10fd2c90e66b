pub mod memory;
pub mod message;
pub mod run;
pub mod state;
pub mod step;
pub mod trigger;

pub use memory::{level_caps, MemoryItem, MemoryModule};
pub use message::{DeliveryStatus, Direction, Message};
pub use run::{ContextMessage, Run, RunInput, RunKind, RunRole, RunStatus};
pub use state::{InboxEntry, RunState};
pub use step::{RunStep, StepStatus, StepType};
pub use trigger::{Trigger, TriggerType};
