//! Tool dispatch fabric: the registry mapping public tool names to owners,
//! the deprecation/alias layer, argument validation, the feedback loop,
//! and the dispatcher every frontend funnels through.

pub mod aliases;
pub mod dispatcher;
pub mod feedback;
pub mod registry;
pub mod telemetry;
pub mod validate;

use async_trait::async_trait;
use serde_json::Value;

use mimo_domain::error::Result;
use mimo_domain::tool::{CallContext, ToolDescriptor};

pub use dispatcher::Dispatcher;
pub use feedback::FeedbackLoop;
pub use registry::{Lookup, ToolRegistry};
pub use telemetry::TelemetryRecorder;

/// An in-process tool implementation. Handlers are pure functions of
/// `(args, context)`; shared state enters only through the collaborators
/// a handler was constructed with.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn handle(&self, args: Value, ctx: &CallContext) -> Result<Value>;
}
