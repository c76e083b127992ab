//! Lead Conversion API Library
//!
//! Turns a qualified lead into a client (new or existing) plus an open
//! opportunity in one atomic commit, with fuzzy duplicate detection, a
//! step-by-step conversion wizard and a best-effort copy of the lead's
//! interaction history.
//!
//! # Modules
//!
//! - `api`: HTTP layer namespace.
//! - `core`: Conversion pipeline namespace.
//! - `circuit_breaker`: Circuit breaker guarding the history transfer.
//! - `config`: Configuration management.
//! - `conversion`: Atomic conversion coordinator.
//! - `db`: Database connection and pool management.
//! - `decision`: Conversion decision and validated drafts.
//! - `duplicates`: Duplicate client detection.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `history`: Interaction history transfer.
//! - `models`: Durable entities and projections.
//! - `similarity`: Levenshtein name similarity.
//! - `store`: Document store contract and backends.
//! - `wizard`: Conversion wizard state machine.

pub mod api;
pub mod core;

pub mod circuit_breaker;
pub mod config;
pub mod conversion;
pub mod db;
pub mod decision;
pub mod duplicates;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod models;
pub mod similarity;
pub mod store;
pub mod wizard;
