//! Illustrative built-in tools. Not a plugin ecosystem — a minimal reference
//! set showing how a tool plugs into the registry.

pub mod weather;
pub mod web_search;
