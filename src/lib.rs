//! Floodgate - Adaptive Multi-Tier Admission Control
//!
//! This crate decides, per inbound HTTP request, whether to admit it based on
//! who is asking, which endpoint is targeted and which roles the caller holds.
//! Each client gets a per-minute token bucket, an hourly sliding window and a
//! burst window; clients that keep getting rejected are quarantined for a
//! cooldown period.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
