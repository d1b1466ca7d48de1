//! Subprocess-backed external skills: the line-delimited JSON-RPC
//! protocol, the per-process transport, and the lazy-spawning supervisor.

pub mod protocol;
pub mod supervisor;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, SkillToolDef};
pub use supervisor::{SkillDeath, SkillSupervisor};
pub use transport::TransportError;
