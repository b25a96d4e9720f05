//! Alertcast - emergency alert ingestion and on-air scheduling.
//!
//! This crate consumes a continuous CAP (Common Alerting Protocol) feed such as
//! Canada's NAAD stream, decides which alerts concern the station's coverage
//! area, tracks their lifecycle and inserts the synthesized alert content into
//! a shared playback queue.
//!
//! # Architecture
//!
//! ```text
//! FeedConnection ─► raw XML ─► cap::Alert::parse ─► IntakeQueue
//!                                                      │
//!                                                      ▼
//!                      AlertProcessor (dedupe, relevance, lifecycle)
//!                                                      │
//!                          MediaGenerator ◄────────────┤
//!                                                      ▼
//!                         PlaybackController + TriggerSet
//! ```
//!
//! - [`feed`] - reconnecting streaming client framing `<?xml ... </alert>` messages
//! - [`cap`] - CAP alert model, relevance queries and message rendering
//! - [`media`] - audio/image generation and text-to-speech backends
//! - [`processor`] - alert state machine and play-cycle scheduler
//! - [`playback`] - playback queue interface consumed by the scheduler
//! - [`triggers`] - hooks invoked around each play cycle
//! - [`http`] - HTTP fetching used for reference backfill and remote resources
//! - [`config`] - YAML configuration with environment variable overrides
//! - [`utils`] - artifact naming and path helpers

pub mod cap;
pub mod config;
pub mod feed;
pub mod http;
pub mod media;
pub mod playback;
pub mod processor;
pub mod triggers;
pub mod utils;
