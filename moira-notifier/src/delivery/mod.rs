//! Delivery confirmation for senders that support it.
//!
//! Senders hand back a probe after a successful send; the probe is stored in
//! a per-contact-type sorted set scored by its next check instant. One
//! [`DeliveryController`] per contact type, guarded by a cluster-wide lock,
//! polls due probes until each reaches a terminal verdict.

pub mod checker;
pub mod controller;

pub use checker::DeliveryChecker;
pub use controller::{DeliveryController, TickSummary, dedup_probes};
