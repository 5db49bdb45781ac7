//! The log distribution fabric (spec §4.12).
//!
//! A plain (uncached) producer at `Process/Log` publishes one record per
//! emitted log line: `{message, json_metadata}`, MessagePack-encoded,
//! where `json_metadata` is itself a JSON string carrying
//! `{severity, thread_id, component}`. Two independent verbosity trees —
//! "Standard Output" and "YOGI" — each have a cached-master
//! `Max Verbosity` terminal and one cached-master terminal per named
//! component under `Components/<name>`, created the first time that
//! component logs. [`LogFabric`] implements
//! [`crate::observability::LogSink`] so it can be installed as the
//! destination for [`crate::observability::fabric_layer::FabricLayer`].

use crate::endpoint::EndpointCore;
use crate::error::Error;
use crate::observability::{LogSink, Severity, Verbosity};
use crate::terminal::pubsub::PubSubTerminal;
use crate::terminal::{TerminalCore, TerminalId};
use crate::types::{Encoding, Message, Time, TerminalVariant};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{DEFAULT_QUEUE_CAPACITY, LOG_SIGNATURE, VERBOSITY_SIGNATURE};

/// Which of the two independent verbosity trees a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityTree {
    StandardOutput,
    Yogi,
}

impl VerbosityTree {
    fn root(self) -> &'static str {
        match self {
            Self::StandardOutput => "Process/Standard Output Log Verbosity",
            Self::Yogi => "Process/YOGI Log Verbosity",
        }
    }
}

#[derive(Serialize)]
struct LogRecord {
    message: String,
    json_metadata: String,
}

#[derive(Serialize)]
struct LogMetadata<'a> {
    severity: &'a str,
    thread_id: String,
    component: &'a str,
}

struct ComponentVerbosity {
    stdout_terminal: Arc<PubSubTerminal>,
    yogi_terminal: Arc<PubSubTerminal>,
    stdout: Verbosity,
    yogi: Verbosity,
}

/// Owns the `Process/Log` producer and the two verbosity trees.
pub struct LogFabric {
    endpoint: Arc<EndpointCore>,
    log_terminal: Arc<PubSubTerminal>,
    stdout_max_terminal: Arc<PubSubTerminal>,
    yogi_max_terminal: Arc<PubSubTerminal>,
    stdout_max: Mutex<Verbosity>,
    yogi_max: Mutex<Verbosity>,
    components: Mutex<HashMap<String, ComponentVerbosity>>,
}

impl LogFabric {
    pub(crate) fn new(endpoint: &Arc<EndpointCore>) -> Result<Arc<Self>, Error> {
        let log_id = endpoint.create_terminal(
            "Process/Log",
            TerminalVariant::Producer,
            LOG_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let stdout_max_id = endpoint.create_terminal(
            &format!("{}/Max Verbosity", VerbosityTree::StandardOutput.root()),
            TerminalVariant::CachedMaster,
            VERBOSITY_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;
        let yogi_max_id = endpoint.create_terminal(
            &format!("{}/Max Verbosity", VerbosityTree::Yogi.root()),
            TerminalVariant::CachedMaster,
            VERBOSITY_SIGNATURE,
            DEFAULT_QUEUE_CAPACITY,
        )?;

        let fabric = Arc::new(Self {
            endpoint: Arc::clone(endpoint),
            log_terminal: pubsub_core(endpoint, log_id),
            stdout_max_terminal: pubsub_core(endpoint, stdout_max_id),
            yogi_max_terminal: pubsub_core(endpoint, yogi_max_id),
            stdout_max: Mutex::new(Verbosity::Info),
            yogi_max: Mutex::new(Verbosity::Info),
            components: Mutex::new(HashMap::new()),
        });
        fabric.publish_verbosity(&fabric.stdout_max_terminal, Verbosity::Info);
        fabric.publish_verbosity(&fabric.yogi_max_terminal, Verbosity::Info);
        Ok(fabric)
    }

    pub fn set_max_verbosity(&self, tree: VerbosityTree, verbosity: Verbosity) {
        let (lock, terminal) = match tree {
            VerbosityTree::StandardOutput => (&self.stdout_max, &self.stdout_max_terminal),
            VerbosityTree::Yogi => (&self.yogi_max, &self.yogi_max_terminal),
        };
        *lock.lock() = verbosity;
        self.publish_verbosity(terminal, verbosity);
    }

    #[must_use]
    pub fn max_verbosity(&self, tree: VerbosityTree) -> Verbosity {
        match tree {
            VerbosityTree::StandardOutput => *self.stdout_max.lock(),
            VerbosityTree::Yogi => *self.yogi_max.lock(),
        }
    }

    pub fn set_component_verbosity(&self, tree: VerbosityTree, component: &str, verbosity: Verbosity) {
        self.ensure_component(component);
        let mut components = self.components.lock();
        let slot = components.get_mut(component).expect("just ensured");
        match tree {
            VerbosityTree::StandardOutput => {
                slot.stdout = verbosity;
                self.publish_verbosity(&slot.stdout_terminal, verbosity);
            }
            VerbosityTree::Yogi => {
                slot.yogi = verbosity;
                self.publish_verbosity(&slot.yogi_terminal, verbosity);
            }
        }
    }

    #[must_use]
    pub fn component_verbosity(&self, tree: VerbosityTree, component: &str) -> Verbosity {
        let components = self.components.lock();
        match components.get(component) {
            Some(slot) => match tree {
                VerbosityTree::StandardOutput => slot.stdout,
                VerbosityTree::Yogi => slot.yogi,
            },
            None => Verbosity::Info,
        }
    }

    /// Creates (if not already present) the pair of cached-master
    /// component terminals for `component`, defaulting both verbosities
    /// to `Info`.
    fn ensure_component(&self, component: &str) {
        if self.components.lock().contains_key(component) {
            return;
        }
        let stdout_id = self
            .endpoint
            .create_terminal(
                &format!("{}/Components/{component}", VerbosityTree::StandardOutput.root()),
                TerminalVariant::CachedMaster,
                VERBOSITY_SIGNATURE,
                DEFAULT_QUEUE_CAPACITY,
            )
            .expect("component verbosity terminal names are unique per component");
        let yogi_id = self
            .endpoint
            .create_terminal(
                &format!("{}/Components/{component}", VerbosityTree::Yogi.root()),
                TerminalVariant::CachedMaster,
                VERBOSITY_SIGNATURE,
                DEFAULT_QUEUE_CAPACITY,
            )
            .expect("component verbosity terminal names are unique per component");
        let stdout_terminal = pubsub_core(&self.endpoint, stdout_id);
        let yogi_terminal = pubsub_core(&self.endpoint, yogi_id);
        self.publish_verbosity(&stdout_terminal, Verbosity::Info);
        self.publish_verbosity(&yogi_terminal, Verbosity::Info);
        self.components.lock().insert(
            component.to_string(),
            ComponentVerbosity {
                stdout_terminal,
                yogi_terminal,
                stdout: Verbosity::Info,
                yogi: Verbosity::Info,
            },
        );
    }

    fn publish_verbosity(&self, terminal: &Arc<PubSubTerminal>, verbosity: Verbosity) {
        let payload = vec![verbosity as u8];
        let msg = Message::new(VERBOSITY_SIGNATURE, Encoding::Raw, payload).with_timestamp(Time::now());
        let _ = terminal.try_publish(msg);
    }

    fn effective_yogi_verbosity(&self, component: &str) -> Verbosity {
        let max = self.max_verbosity(VerbosityTree::Yogi);
        self.component_verbosity(VerbosityTree::Yogi, component).clamped_by(max)
    }
}

impl LogSink for LogFabric {
    fn record(&self, severity: Severity, component: &str, message: &str) {
        let thread_id = format!("{:?}", std::thread::current().id());
        let metadata = LogMetadata {
            severity: severity.as_str(),
            thread_id,
            component,
        };
        let Ok(json_metadata) = serde_json::to_string(&metadata) else {
            return;
        };
        let record = LogRecord {
            message: message.to_string(),
            json_metadata,
        };
        let Ok(payload) = rmp_serde::to_vec(&record) else {
            return;
        };
        let msg = Message::new(LOG_SIGNATURE, Encoding::MsgPack, payload).with_timestamp(Time::now());
        let _ = self.log_terminal.try_publish(msg);
    }

    fn verbosity_for(&self, component: &str) -> Verbosity {
        self.effective_yogi_verbosity(component)
    }
}

fn pubsub_core(endpoint: &Arc<EndpointCore>, id: TerminalId) -> Arc<PubSubTerminal> {
    let record = endpoint.get_terminal(id).expect("terminal just created");
    let TerminalCore::PubSub(terminal) = record.core else {
        unreachable!("Producer/CachedMaster terminals always build a PubSub core")
    };
    terminal
}
