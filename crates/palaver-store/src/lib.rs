//! # palaver-store
//!
//! SQLite persistence for Palaver.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Call status changes go through guarded transitions that run inside
//! an immediate transaction, so a user action racing the ring timeout can
//! only ever be applied once.

pub mod blobs;
pub mod calls;
pub mod database;
pub mod group_calls;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;
mod sql;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
