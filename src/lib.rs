//! Alex: a journaling and reflection assistant for chat.

pub mod agent;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod flows;
pub mod llm;
pub mod scheduler;
pub mod session;
pub mod store;
