//! Read-only HTTP surface: history queries over the persisted tables, plus
//! `/health` and `/metrics` (C19, SPEC_FULL.md §10.5).

pub mod routes;
