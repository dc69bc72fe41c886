//! Rota — fairness engine for rotating shared tasks.
//!
//! Given a domain's catalog (agents + weighted tasks) and a target date, the
//! engine produces one balanced assignment per rotating task, materializes the
//! result into per-agent daily lists, and records each rotating assignment in
//! an append-only history used for future tie-breaks.

pub mod batch;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
