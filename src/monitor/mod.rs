//! Read-only diagnostics endpoint

pub mod server;
pub mod handlers;

pub use server::{MonitorServer, MonitorState, Role};
