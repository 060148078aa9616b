//! # Hookclock Gateway
//! HTTP API for inspecting the scheduled-event engine and managing one-off events.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
