//! In-process transactional store for runs, steps, messages, memory items,
//! and triggers. Exposes atomic claim, update-by-id, insert, and ordered
//! step append — the primitives the run engine and queue workers build on.

mod cancel;
mod memory_store;
mod message_store;
mod run_store;
mod trigger_store;

pub use cancel::{CancelMap, CancelToken};
pub use memory_store::MemoryStore;
pub use message_store::MessageStore;
pub use run_store::{AppendStepError, ClaimError, RunStore};
pub use trigger_store::TriggerStore;
