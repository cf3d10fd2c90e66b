//! Illustrative `weather.get` tool — fixed, offline data, no outbound calls.
//!
//! Exists to give the registry and the engine's auto-spawn path something
//! concrete and deterministic to exercise; not a real weather integration.

use std::sync::Arc;

use async_trait::async_trait;
use sa_domain::error::Result;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::handler::{ToolHandler, ToolOutcome};
use crate::registry::{ToolCommand, ToolDef};

pub struct WeatherTool;

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn handle(&self, _ctx: &ToolContext, command: &str, args: Value) -> Result<ToolOutcome> {
        match command {
            "get" => {
                let city = args
                    .get("city")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                Ok(ToolOutcome::ok(json!({
                    "city": city,
                    "condition": "overcast",
                    "temperature_c": 18,
                })))
            }
            other => Ok(ToolOutcome::failed(format!("unknown command '{other}'"))),
        }
    }
}

impl WeatherTool {
    pub fn definition() -> ToolDef {
        ToolDef {
            name: "weather".into(),
            short_description: "Look up current weather conditions.".into(),
            long_description:
                "Returns a fixed, offline weather reading for a named city. Illustrative only."
                    .into(),
            commands: vec![ToolCommand {
                name: "get".into(),
                description: "Get the current conditions for a city.".into(),
                args_schema: json!({
                    "type": "object",
                    "properties": {
                        "city": { "type": "string", "description": "City name" }
                    },
                    "required": ["city"]
                }),
            }],
            config_schema: None,
            pinned: false,
            important: false,
            policy: Default::default(),
            handler: Arc::new(WeatherTool),
        }
    }
}
