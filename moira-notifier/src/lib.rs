//! moira-notifier library crate.
//!
//! Notification dispatch core: schedules alert events against subscription
//! calendars and throttling, fans packages out to sender adapters, reschedules
//! failed deliveries and confirms deliveries for senders that support it.

pub mod config;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod format;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod plotting;
pub mod scheduler;
pub mod senders;
pub mod store;
pub mod template;
pub mod utils;

pub use error::{Error, Result};
