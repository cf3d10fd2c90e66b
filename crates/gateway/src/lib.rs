//! Worker-process wiring for the run engine: configuration loading, queue
//! consumers, the trigger dispatcher, outbound delivery, and graceful
//! shutdown. The HTTP ingress and channel webhooks live outside this binary;
//! runs arrive as jobs on the `runs` queue.

pub mod bootstrap;
pub mod cli;
pub mod delivery;
pub mod settings;
pub mod state;
pub mod telemetry;
pub mod workers;
