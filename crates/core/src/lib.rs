//! Taibai Core Library
//!
//! Transport-free building blocks for the hub client: the wire envelope
//! codec, typed application events, and client configuration.

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;

pub use config::{ClientConfig, ConfigError};
pub use envelope::{decode, encode, Envelope, FrameClass, SeqGenerator};
pub use error::{Error, Result};
pub use events::{
    ApprovalChange, ApprovalStatus, CardCallback, EventCategory, HubEvent, UserMessage,
};
