//! Persistence: connection/schema setup (C14's database) and the bounded
//! batch writer that drains the four persist queues into it.

pub mod batch_writer;
pub mod db;
