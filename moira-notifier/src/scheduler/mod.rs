//! Delivery scheduling.
//!
//! - `calendar` aligns an instant to a subscription's delivery windows
//! - `throttle` holds the throttling levels of noisy triggers
//! - `service` combines both into scheduled notifications

pub mod calendar;
pub mod throttle;
mod service;

pub use calendar::next_allowed;
pub use service::{RESEND_DELAY_SECS, ScheduleParams, Scheduler};
pub use throttle::{THROTTLING_LEVELS, ThrottleDecision, ThrottlingLevel};
