//! Taibai Network Library
//!
//! Persistent websocket connection to a Taibai event hub.
//!
//! # Architecture
//!
//! - **HubClient**: owns connection state, dials, and reconnects
//! - **Loops**: one reader, one writer, one heartbeat per live connection
//! - **Outbound queue**: bounded, never blocks producers
//! - **Subscriptions**: topics replayed after every (re)connect
//! - **Dispatcher**: typed handlers and per-category event streams
//!
//! # Usage
//!
//! ```ignore
//! let client = HubClient::new(ClientConfig::new("wss://hub.example.com/ws", token))?;
//!
//! client.on_user_message(|msg| println!("{}: {}", msg.user_name, msg.content));
//! client.on_error(|e| eprintln!("hub error: {}", e));
//!
//! client.connect().await?;
//! client.subscribe("room.42")?;
//!
//! // Or pull events instead of registering handlers
//! let mut approvals = client.events(EventCategory::ApprovalChange);
//! while let Some(event) = approvals.next_event().await {
//!     /* handle */
//! }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod frame;
mod hooks;
mod loops;
pub mod outbound;
pub mod subscriptions;

#[cfg(test)]
mod test_hub;

pub use client::{ConnectionState, HubClient};
pub use dispatcher::EventStream;
pub use error::{Error, Result};
pub use outbound::OutboundQueue;
pub use taibai_core::{
    ApprovalChange, ApprovalStatus, CardCallback, ClientConfig, Envelope, EventCategory, HubEvent,
    UserMessage,
};
