//! Lifecycle callbacks
//!
//! Several callbacks may be registered per hook; they run in registration
//! order. Lists are snapshotted before invoking so a callback may register
//! further callbacks without deadlocking.

use std::sync::Arc;

use parking_lot::RwLock;
use taibai_core::Envelope;

use crate::error::Error;

pub type ConnectHook = Arc<dyn Fn() + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(&Error) + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(&Envelope) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    connect: RwLock<Vec<ConnectHook>>,
    disconnect: RwLock<Vec<DisconnectHook>>,
    message: RwLock<Vec<MessageHook>>,
    error: RwLock<Vec<ErrorHook>>,
}

impl Hooks {
    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.connect.write().push(Arc::new(hook));
    }

    pub fn on_disconnect(&self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        self.disconnect.write().push(Arc::new(hook));
    }

    pub fn on_message(&self, hook: impl Fn(&Envelope) + Send + Sync + 'static) {
        self.message.write().push(Arc::new(hook));
    }

    pub fn on_error(&self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        self.error.write().push(Arc::new(hook));
    }

    pub fn emit_connect(&self) {
        let hooks = self.connect.read().clone();
        for hook in hooks {
            hook();
        }
    }

    pub fn emit_disconnect(&self, cause: &Error) {
        let hooks = self.disconnect.read().clone();
        for hook in hooks {
            hook(cause);
        }
    }

    pub fn emit_message(&self, envelope: &Envelope) {
        let hooks = self.message.read().clone();
        for hook in hooks {
            hook(envelope);
        }
    }

    pub fn emit_error(&self, error: &Error) {
        let hooks = self.error.read().clone();
        for hook in hooks {
            hook(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_hooks_run_in_registration_order() {
        let hooks = Hooks::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            hooks.on_error(move |_| seen.lock().push(i));
        }
        hooks.emit_error(&Error::QueueFull);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_hook_may_register_another() {
        let hooks = Arc::new(Hooks::default());
        let count = Arc::new(AtomicUsize::new(0));

        let inner = hooks.clone();
        let c = count.clone();
        hooks.on_connect(move || {
            let c = c.clone();
            inner.on_connect(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        hooks.emit_connect();
        hooks.emit_connect();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
