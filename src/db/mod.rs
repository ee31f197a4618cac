//! Database module: keyed state with expiry and the SQL that maps it.
//!
//! This module is split into two submodules:
//! - `model`: small view types returned by repositories.
//! - `repo`: SQL-only functions over the SQLite pool.
//!
//! Every keyed row (conversation, media group, pending photo add, seen update)
//! carries an `expires_at` in unix milliseconds; readers ignore expired rows
//! and `purge_expired` deletes them.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{AppendOutcome, PurgeCounts};
