#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{Event, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

#[derive(Default, Debug, Clone)]
pub struct EventData {
    pub level: String,
    pub message: String,
    pub fields: HashMap<String, String>, // stringified values via Debug
}

#[derive(Default, Debug)]
pub struct EventStore {
    pub events: Mutex<Vec<EventData>>,
}

#[derive(Clone)]
pub struct CaptureLayer {
    pub store: Arc<EventStore>,
}

struct MapVisitor<'a> {
    data: &'a mut EventData,
}

impl Visit for MapVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        if field.name() == "message" {
            self.data.message = format!("{value:?}");
        } else {
            self.data
                .fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.data
            .fields
            .insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.data.message = value.to_string();
        } else {
            self.data
                .fields
                .insert(field.name().to_string(), value.to_string());
        }
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut data = EventData {
            level: event.metadata().level().to_string(),
            ..Default::default()
        };
        event.record(&mut MapVisitor { data: &mut data });
        self.store.events.lock().unwrap().push(data);
    }
}

/// Events captured on the current thread while this value is alive.
pub struct Capture {
    pub store: Arc<EventStore>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl Capture {
    pub fn count_message(&self, message: &str) -> usize {
        self.store
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.message == message)
            .count()
    }

    pub fn find(&self, message: &str) -> Option<EventData> {
        self.store
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.message == message)
            .cloned()
    }
}

pub fn install_capture() -> Capture {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(EventStore::default());
    let layer = CaptureLayer {
        store: store.clone(),
    };
    let subscriber = registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    Capture {
        store,
        _guard: guard,
    }
}
