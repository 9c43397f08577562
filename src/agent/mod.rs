//! Agent module: command parsing and the inbound message loop.

pub mod agent_loop;
pub mod commands;

pub use agent_loop::{Agent, AgentDeps, dispatch};
pub use commands::Command;
