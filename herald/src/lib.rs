//! herald: notification dispatch pipeline.
//!
//! Notifications are enqueued durably, claimed in batches by workers, routed
//! to receivers through subscriptions and silences, and delivered at most once
//! per route.

pub mod config;
pub mod database;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod handler;
pub mod logging;
pub mod maintenance;
pub mod matching;
pub mod notifier;
pub mod queue;
pub mod worker;

pub use error::{Error, Result};
