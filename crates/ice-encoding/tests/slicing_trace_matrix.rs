mod support;

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};

use ice_encoding::{new_value, FormatType, StreamConfig, ValueSlot};
use support::{config, decode_value, encode_value, registry_with, Base, Derived, Node};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

#[derive(Debug, Clone)]
struct Captured {
    target: String,
    level: Level,
    fields: String,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

struct FieldText(String);

impl Visit for FieldText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldText(String::new());
        event.record(&mut fields);
        self.events.lock().unwrap().push(Captured {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields: fields.0,
        });
    }
}

/// Decodes a `Derived` instance with only `Base` known and returns the
/// events logged under `ice::slicing`.
fn slicing_events(trace_slicing: bool) -> Vec<Captured> {
    let cfg = StreamConfig {
        trace_slicing,
        ..config(FormatType::Sliced)
    };
    let v = new_value(Derived {
        id: 1,
        label: "traced".into(),
        extra: None,
        peer: ValueSlot::with_value(new_value(Node::new(2))),
    });
    let bytes = encode_value(cfg.clone(), Some(&v));
    let registry = registry_with(|r| {
        r.register_value::<Base>().unwrap();
        r.register_value::<Node>().unwrap();
    });

    let layer = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let slot = tracing::subscriber::with_default(subscriber, || {
        decode_value(&bytes, cfg, registry).unwrap()
    });
    assert_eq!(slot.downcast::<Base, _>(|b| b.id), Some(1));

    let events = layer.events.lock().unwrap();
    events
        .iter()
        .filter(|e| e.target == "ice::slicing")
        .cloned()
        .collect()
}

#[test]
fn sliced_types_are_logged_when_tracing_is_on() {
    let events = slicing_events(true);
    assert_eq!(events.len(), 1, "{events:?}");
    assert_eq!(events[0].level, Level::INFO);
    assert!(events[0].fields.contains(Derived::ID), "{events:?}");
    assert!(events[0].fields.contains("kind=\"value\""), "{events:?}");
}

#[test]
fn nothing_is_logged_when_tracing_is_off() {
    assert!(slicing_events(false).is_empty());
}
