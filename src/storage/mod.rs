//! Persistence for cities, hospitals, and doctors
//!
//! SQLite-backed document store: each record lives as a JSON document with
//! its identity and status mirrored into indexed columns so "pending work"
//! queries stay cheap.

pub mod store;

pub use store::{EntityStore, StatusCounts, UpsertOutcome, VerifyReport};
