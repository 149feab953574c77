//! Upstream connectivity: the auth handshake (C20) and the reconnecting
//! stream supervisor that feeds every frame into the processor (C15).

pub mod auth;
pub mod supervisor;
