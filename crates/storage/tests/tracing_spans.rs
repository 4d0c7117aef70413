//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on `MemoryBackend` operations, and that the timeout
//! wrapper logs when a deadline elapses.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use medianest_storage::{KeyValueStore, MemoryBackend, TimeoutBackend, testutil::FailingBackend};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names and event messages
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut |field: &tracing::field::Field, value: &dyn std::fmt::Debug| {
            if field.name() == "message" {
                message = format!("{value:?}");
            }
        });
        self.events.lock().expect("lock poisoned").push(message);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crud_operations_produce_distinct_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"v".to_vec()).await.expect("set should succeed");
    backend.set_with_ttl(b"t".to_vec(), b"v".to_vec(), Duration::from_secs(5)).await.expect("set_with_ttl");
    let _ = backend.get(b"k").await;
    backend.delete(b"k").await.expect("delete should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["set", "set_with_ttl", "get", "delete"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn timeout_emits_warning_event() {
    let collector = SpanCollector::default();
    let events = Arc::clone(&collector.events);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let slow = FailingBackend::new(MemoryBackend::new());
    slow.set_delay(Duration::from_millis(50));
    let backend = TimeoutBackend::new(slow, Duration::from_millis(5)).expect("valid timeout");
    let _ = backend.get(b"k").await;

    let recorded = events.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|m| m.contains("timed out")),
        "expected a timeout warning, got: {recorded:?}"
    );
}
