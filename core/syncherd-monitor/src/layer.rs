//! A `tracing` layer that republishes events to a [`LogPublisher`].

use crate::hub::LogPublisher;
use crate::record::{ENGINE_LOG_COMPONENT, LogRecord};
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Publishes every tracing event as a [`LogRecord`].
///
/// The `component` field, when present, becomes the record's component;
/// otherwise the event target is used. Remaining fields are appended to the
/// message as `key=value`. Events targeted at [`ENGINE_LOG_COMPONENT`] are
/// skipped because the monitor publishes engine lines itself.
pub struct HubLayer<P> {
    publisher: P,
}

impl<P> HubLayer<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }
}

impl<S, P> Layer<S> for HubLayer<P>
where
    S: Subscriber,
    P: LogPublisher + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() == ENGINE_LOG_COMPONENT {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let component = visitor
            .component
            .unwrap_or_else(|| metadata.target().to_string());
        let mut message = visitor.message.unwrap_or_default();
        for (key, value) in visitor.fields {
            let _ = write!(message, " {key}={value}");
        }

        self.publisher.publish(LogRecord::new(
            metadata.level().as_str(),
            message.trim_start().to_string(),
            component,
        ));
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    component: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl RecordVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "component" => self.component = Some(value),
            name => self.fields.push((name, value)),
        }
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::LogHub;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn events_become_records() {
        let hub = LogHub::default();
        let mut sub = hub.subscribe();
        let subscriber = tracing_subscriber::registry().with(HubLayer::new(hub.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(component = "reconciler", sync = "orders", "Recreating sync");
            tracing::info!(target: "engine_log", "skipped");
        });

        let record = sub.try_recv().unwrap();
        assert_eq!(record.level, "WARN");
        assert_eq!(record.component, "reconciler");
        assert_eq!(record.message, "Recreating sync sync=orders");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn target_is_the_default_component() {
        let hub = LogHub::default();
        let mut sub = hub.subscribe();
        let subscriber = tracing_subscriber::registry().with(HubLayer::new(hub.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "syncherd::service", "Engine started");
        });

        assert_eq!(sub.try_recv().unwrap().component, "syncherd::service");
    }
}
