//! Role-aware ticket desk: support tickets and feature requests moving through
//! a fixed workflow, with time tracking, activity reports and in-app
//! notifications kept in a local SQLite backend.

pub mod activity;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod policy;
pub mod reports;
pub mod session;
pub mod timetrack;
pub mod visibility;

#[cfg(test)]
mod test_support;

pub use db::Database;
pub use error::{Result, TicketError};
pub use session::Session;
