//! The mimo gateway binary crate: HTTP and stdio frontends over the tool
//! dispatch fabric, plus the background loops (consolidation, decay,
//! cleanup, health).

pub mod api;
pub mod background;
pub mod bootstrap;
pub mod cli;
pub mod state;
pub mod stdio;
