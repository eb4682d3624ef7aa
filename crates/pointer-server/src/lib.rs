//! HTTP surface: message intake, project cancel, quick edit and health.

pub mod handlers;
pub mod server;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
