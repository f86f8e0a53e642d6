//! Inbound frames: parse, then hand to the message handler on the event loop.

use std::sync::Arc;

use dbot_core::{DbotError, LoopHandle, MessageHandler, Result, RobotIdentity};
use serde_json::Value;
use tracing::{debug, warn};

/// Parses each inbound text frame and schedules the handler with the robot identity and the
/// parsed value. Only JSON validity is checked here; the shape of the event is the handler's
/// business.
#[derive(Clone)]
pub struct InboundDispatcher {
    handle: LoopHandle,
    handler: Arc<dyn MessageHandler>,
    robot: Arc<RobotIdentity>,
}

impl std::fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDispatcher")
            .field("robot", &self.robot.id)
            .finish()
    }
}

impl InboundDispatcher {
    pub fn new(handle: LoopHandle, handler: Arc<dyn MessageHandler>, robot: RobotIdentity) -> Self {
        Self {
            handle,
            handler,
            robot: Arc::new(robot),
        }
    }

    /// Parses `raw` and defers a handler invocation.
    ///
    /// Invalid JSON is a [`DbotError::MalformedFrame`] and nothing is scheduled. The handler
    /// runs as a tracked task so a slow handler does not hold up the queue; its errors are
    /// logged, not propagated.
    pub fn on_message(&self, raw: &str) -> Result<()> {
        let event: Value =
            serde_json::from_str(raw).map_err(|e| DbotError::MalformedFrame(e.to_string()))?;
        debug!(event_type = ?event.get("type"), "inbound: frame parsed");

        let spawner = self.handle.clone();
        let handler = Arc::clone(&self.handler);
        let robot = Arc::clone(&self.robot);
        self.handle.defer(move || {
            spawner.spawn(async move {
                if let Err(e) = handler.handle(&robot, event).await {
                    warn!(error = %e, "inbound: message handler failed");
                }
            });
        })
    }
}
