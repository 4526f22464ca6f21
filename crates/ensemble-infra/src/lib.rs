//! Infrastructure layer for Ensemble.
//!
//! SQLite implementations of the repository ports defined in
//! `ensemble-core`. Application code constructs these and hands them to the
//! engine as trait objects or generics; nothing here is referenced from the
//! core crate.

pub mod sqlite;
