//! Event dispatcher
//!
//! Routes decoded application envelopes to the handlers registered for their
//! category, and to any open [`EventStream`] for that category.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use taibai_core::{ApprovalChange, CardCallback, Envelope, EventCategory, HubEvent, UserMessage};
use tokio::sync::mpsc;
use tracing::trace;

pub type UserMessageHandler = Arc<dyn Fn(&UserMessage) + Send + Sync>;
pub type CardCallbackHandler = Arc<dyn Fn(&CardCallback) + Send + Sync>;
pub type ApprovalChangeHandler = Arc<dyn Fn(&ApprovalChange) + Send + Sync>;
/// Receives the raw event name and payload
pub type SystemHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    user_message: Vec<UserMessageHandler>,
    card_callback: Vec<CardCallbackHandler>,
    approval_change: Vec<ApprovalChangeHandler>,
    system: Vec<SystemHandler>,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HandlerRegistry>,
    streams: Mutex<Vec<(EventCategory, mpsc::UnboundedSender<HubEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_user_message(&self, handler: impl Fn(&UserMessage) + Send + Sync + 'static) {
        self.handlers.write().user_message.push(Arc::new(handler));
    }

    pub fn on_card_callback(&self, handler: impl Fn(&CardCallback) + Send + Sync + 'static) {
        self.handlers.write().card_callback.push(Arc::new(handler));
    }

    pub fn on_approval_change(&self, handler: impl Fn(&ApprovalChange) + Send + Sync + 'static) {
        self.handlers.write().approval_change.push(Arc::new(handler));
    }

    pub fn on_system(&self, handler: impl Fn(&str, &Value) + Send + Sync + 'static) {
        self.handlers.write().system.push(Arc::new(handler));
    }

    /// Open a stream of every future event in `category`
    pub fn stream(&self, category: EventCategory) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push((category, tx));
        EventStream { category, rx }
    }

    /// Decode and deliver one application envelope.
    ///
    /// Fails only if the payload does not match the typed event its name
    /// announces; no handler runs in that case.
    pub fn dispatch(&self, envelope: &Envelope) -> taibai_core::Result<EventCategory> {
        let event = HubEvent::decode(envelope)?;
        let category = event.category();

        match &event {
            HubEvent::UserMessage(msg) => {
                let handlers = self.handlers.read().user_message.clone();
                trace!(handlers = handlers.len(), message_id = %msg.message_id, "Dispatching user message");
                for handler in handlers {
                    handler(msg);
                }
            }
            HubEvent::CardCallback(callback) => {
                let handlers = self.handlers.read().card_callback.clone();
                for handler in handlers {
                    handler(callback);
                }
            }
            HubEvent::ApprovalChange(change) => {
                let handlers = self.handlers.read().approval_change.clone();
                for handler in handlers {
                    handler(change);
                }
            }
            HubEvent::System { event: name, payload } => {
                let handlers = self.handlers.read().system.clone();
                trace!(event = %name, handlers = handlers.len(), "Dispatching system event");
                for handler in handlers {
                    handler(name, payload);
                }
            }
        }

        let mut streams = self.streams.lock();
        streams.retain(|(wanted, tx)| {
            if *wanted != category {
                return !tx.is_closed();
            }
            tx.send(event.clone()).is_ok()
        });

        Ok(category)
    }
}

/// Events of one category, in arrival order
pub struct EventStream {
    category: EventCategory,
    rx: mpsc::UnboundedReceiver<HubEvent>,
}

impl EventStream {
    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// Next event, or `None` once the owning client is gone
    pub async fn next_event(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = HubEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
