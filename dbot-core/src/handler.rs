//! Message handler that only records what arrives. Used by the CLI when no business logic is
//! plugged in.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::types::{MessageHandler, RobotIdentity};

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl LoggingHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, robot: &RobotIdentity, event: Value) -> Result<()> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
        match event_type {
            "message" => {
                let channel = event.get("channel").and_then(Value::as_str).unwrap_or("");
                let user = event.get("user").and_then(Value::as_str).unwrap_or("");
                let text_len = event
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::len)
                    .unwrap_or(0);
                info!(
                    robot_id = %robot.id,
                    channel = %channel,
                    user = %user,
                    text_len,
                    from_self = user == robot.id,
                    "Received message"
                );
            }
            _ => debug!(robot_id = %robot.id, event_type = %event_type, "Received event"),
        }
        Ok(())
    }
}
