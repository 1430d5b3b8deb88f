//! Typed application events carried in envelope payloads

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::{Error, Result};

pub const EVENT_USER_MESSAGE: &str = "user_message";
pub const EVENT_CARD_CALLBACK: &str = "card_callback";
pub const EVENT_APPROVAL_CHANGE: &str = "approval_change";

/// Handler category an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    UserMessage,
    CardCallback,
    ApprovalChange,
    /// Anything the client has no typed decoder for
    System,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::UserMessage,
        EventCategory::CardCallback,
        EventCategory::ApprovalChange,
        EventCategory::System,
    ];

    /// Map a wire event name to its category
    pub fn of(event: &str) -> Self {
        match event {
            EVENT_USER_MESSAGE => EventCategory::UserMessage,
            EVENT_CARD_CALLBACK => EventCategory::CardCallback,
            EVENT_APPROVAL_CHANGE => EventCategory::ApprovalChange,
            _ => EventCategory::System,
        }
    }
}

/// A message a user sent in a channel or group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMessage {
    pub message_id: String,
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    /// text, image, voice, video, file, card, ...
    pub message_type: String,
    pub channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

/// A button press on an interactive card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardCallback {
    pub callback_id: String,
    pub user_id: String,
    pub card_id: String,
    /// ID of the pressed button
    pub action: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    #[default]
    #[serde(other)]
    Unknown,
}

/// State change of an approval request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalChange {
    pub approval_id: String,
    pub status: ApprovalStatus,
    pub applicant_id: String,
    pub applicant_name: String,
    pub approver_id: String,
    pub approver_name: String,
    pub comment: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

impl UserMessage {
    pub fn parse(payload: &Value) -> Result<Self> {
        parse_payload(EVENT_USER_MESSAGE, payload)
    }
}

impl CardCallback {
    pub fn parse(payload: &Value) -> Result<Self> {
        parse_payload(EVENT_CARD_CALLBACK, payload)
    }
}

impl ApprovalChange {
    pub fn parse(payload: &Value) -> Result<Self> {
        parse_payload(EVENT_APPROVAL_CHANGE, payload)
    }
}

fn parse_payload<T: for<'de> Deserialize<'de>>(event: &str, payload: &Value) -> Result<T> {
    T::deserialize(payload).map_err(|source| Error::Payload {
        event: event.to_string(),
        source,
    })
}

fn default_timestamp(ts: &mut i64) {
    if *ts == 0 {
        *ts = Utc::now().timestamp();
    }
}

/// A decoded application event
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    UserMessage(UserMessage),
    CardCallback(CardCallback),
    ApprovalChange(ApprovalChange),
    /// Unrecognized event, passed through undecoded
    System { event: String, payload: Value },
}

impl HubEvent {
    /// Decode an application envelope by its event name.
    ///
    /// Typed events with a missing or zero timestamp get the current time.
    pub fn decode(envelope: &Envelope) -> Result<Self> {
        let event = match EventCategory::of(&envelope.event) {
            EventCategory::UserMessage => {
                let mut msg = UserMessage::parse(&envelope.payload)?;
                default_timestamp(&mut msg.timestamp);
                HubEvent::UserMessage(msg)
            }
            EventCategory::CardCallback => {
                let mut callback = CardCallback::parse(&envelope.payload)?;
                default_timestamp(&mut callback.timestamp);
                HubEvent::CardCallback(callback)
            }
            EventCategory::ApprovalChange => {
                let mut change = ApprovalChange::parse(&envelope.payload)?;
                default_timestamp(&mut change.timestamp);
                HubEvent::ApprovalChange(change)
            }
            EventCategory::System => HubEvent::System {
                event: envelope.event.clone(),
                payload: envelope.payload.clone(),
            },
        };
        Ok(event)
    }

    pub fn category(&self) -> EventCategory {
        match self {
            HubEvent::UserMessage(_) => EventCategory::UserMessage,
            HubEvent::CardCallback(_) => EventCategory::CardCallback,
            HubEvent::ApprovalChange(_) => EventCategory::ApprovalChange,
            HubEvent::System { .. } => EventCategory::System,
        }
    }
}
