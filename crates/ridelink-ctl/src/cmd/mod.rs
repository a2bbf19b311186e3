//! CLI command modules.

pub mod args;
pub mod chat;
pub mod rides;
