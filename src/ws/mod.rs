//! WebSocket surface: per-channel connection bookkeeping (C13), the
//! throttled publisher (C12), and the axum upgrade handlers (C19).

pub mod connection_manager;
pub mod publisher;
pub mod routes;
