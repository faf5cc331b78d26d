#![cfg(test)]

use std::sync::{Arc, Mutex};
use tracing::{Event, Level, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{layer::Context, Layer};

#[derive(Default, Debug)]
pub struct LogStore {
    pub events: Mutex<Vec<(Level, String)>>,
}

impl LogStore {
    pub fn debug_messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == Level::DEBUG)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct CaptureLayer {
    pub store: Arc<LogStore>,
}

struct MessageVisitor<'a> {
    message: &'a mut String,
}

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        if field.name() == "message" {
            *self.message = format!("{value:?}");
        }
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = value.to_string();
        }
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor { message: &mut message });
        self.store
            .events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message));
    }
}

/// Capture events on the current thread until the guard is dropped.
pub fn install_capture() -> (Arc<LogStore>, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(LogStore::default());
    let layer = CaptureLayer { store: store.clone() };
    let subscriber = registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
