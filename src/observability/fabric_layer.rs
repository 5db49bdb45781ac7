//! Bridge between internal `tracing` diagnostics and the user-facing Log
//! distribution fabric (spec §4.12).
//!
//! The two are intentionally separate: `tracing` events are for a
//! developer running the process under `RUST_LOG`, while the Log fabric
//! republishes records as Yogi messages other endpoints can subscribe to.
//! This is the one adapter connecting them — anything implementing
//! [`LogSink`] (in practice, [`crate::process::log::LogFabric`]) can be
//! installed as a `tracing::Subscriber` layer and will receive every
//! event that clears its verbosity gate.

use super::{Severity, Verbosity};
use std::sync::Arc;

/// A destination for bridged log records. Implemented by the Log
/// distribution fabric; kept as a trait here so `observability` does not
/// need to depend on `process`.
pub trait LogSink: Send + Sync {
    fn record(&self, severity: Severity, component: &str, message: &str);
    fn verbosity_for(&self, component: &str) -> Verbosity;
}

/// A `tracing::Layer` that forwards events clearing their component's
/// verbosity gate to a [`LogSink`].
#[derive(Clone)]
pub struct FabricLayer {
    sink: Arc<dyn LogSink>,
}

impl FabricLayer {
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

#[cfg(feature = "tracing-integration")]
mod layer_impl {
    use super::FabricLayer;
    use crate::observability::Severity;
    use tracing::field::{Field, Visit};
    use tracing::{Level, Subscriber};
    use tracing_subscriber::layer::Context;
    use tracing_subscriber::Layer;

    fn severity_for(level: &Level) -> Severity {
        match *level {
            Level::TRACE => Severity::Trace,
            Level::DEBUG => Severity::Debug,
            Level::INFO => Severity::Info,
            Level::WARN => Severity::Warn,
            Level::ERROR => Severity::Error,
        }
    }

    #[derive(Default)]
    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for FabricLayer {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let metadata = event.metadata();
            let severity = severity_for(metadata.level());
            let component = metadata.target();
            if !self.sink.verbosity_for(component).permits(severity) {
                return;
            }
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.sink.record(severity, component, &visitor.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        records: Mutex<Vec<(Severity, String, String)>>,
        verbosity: Verbosity,
    }

    impl LogSink for RecordingSink {
        fn record(&self, severity: Severity, component: &str, message: &str) {
            self.records
                .lock()
                .unwrap()
                .push((severity, component.to_string(), message.to_string()));
        }

        fn verbosity_for(&self, _component: &str) -> Verbosity {
            self.verbosity
        }
    }

    #[test]
    fn sink_gates_on_verbosity() {
        let sink = Arc::new(RecordingSink {
            records: Mutex::new(Vec::new()),
            verbosity: Verbosity::Warn,
        });
        assert!(sink.verbosity_for("x").permits(Severity::Error));
        assert!(!sink.verbosity_for("x").permits(Severity::Debug));
        sink.record(Severity::Error, "x", "boom");
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn layer_can_be_constructed() {
        let sink = Arc::new(RecordingSink {
            records: Mutex::new(Vec::new()),
            verbosity: Verbosity::None,
        });
        let _layer = FabricLayer::new(sink);
    }
}
