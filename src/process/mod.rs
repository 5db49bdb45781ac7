//! The process interface: the operational/anomaly/log fabrics bundled
//! with a [`Leaf`] under a single process-wide singleton (spec §5,
//! §4.10-§4.12).
//!
//! Exactly one [`Process`] may exist per address space; a second
//! construction fails `ProcessAlreadyExists` rather than silently
//! sharing or shadowing the first, mirroring how `EndpointCore::new`
//! makes its own invariants explicit failures rather than implicit
//! behavior.

pub mod anomaly;
pub mod log;
pub mod operational;

use crate::config::ProcessConfig;
use crate::endpoint::Leaf;
use crate::error::{Error, ErrorKind};
use crate::runtime::scheduler::Scheduler;
use crate::types::Signature;
use anomaly::AnomalyFabric;
use log::LogFabric;
use operational::OperationalFabric;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reserved signature for the `Process/Operational` terminal.
pub(crate) const OPERATIONAL_SIGNATURE: Signature = Signature::new(0xF000_0001);
/// Reserved signature for the `Process/Errors` and `Process/Warnings` terminals.
pub(crate) const ANOMALY_SIGNATURE: Signature = Signature::new(0xF000_0002);
/// Reserved signature for the `Process/Log` terminal.
pub(crate) const LOG_SIGNATURE: Signature = Signature::new(0xF000_0003);
/// Reserved signature for the verbosity tree's `Max Verbosity`/`Components/<name>` terminals.
pub(crate) const VERBOSITY_SIGNATURE: Signature = Signature::new(0xF000_0004);

/// Queue capacity used by every fabric-internal terminal. Fabric
/// terminals are cached-producer/master singletons that publish at most
/// one outstanding value; a deep send queue buys nothing.
pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 16;

static PROCESS_EXISTS: AtomicBool = AtomicBool::new(false);

/// The process-wide singleton: one [`Leaf`] plus the operational,
/// anomaly, and log fabrics built on top of it (spec §5).
pub struct Process {
    leaf: Leaf,
    operational: Arc<OperationalFabric>,
    anomaly: Arc<AnomalyFabric>,
    log: Arc<LogFabric>,
}

impl Process {
    /// Constructs the process singleton. Fails `ProcessAlreadyExists` if
    /// one has already been constructed in this address space and not
    /// yet dropped.
    pub fn new(scheduler: Scheduler, config: &ProcessConfig) -> Result<Self, Error> {
        if PROCESS_EXISTS.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::ProcessAlreadyExists));
        }
        let leaf = Leaf::new(scheduler, config.location_path());
        let core = leaf.core();
        let operational = match OperationalFabric::new(core) {
            Ok(f) => f,
            Err(e) => {
                PROCESS_EXISTS.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let anomaly = match AnomalyFabric::new(core) {
            Ok(f) => f,
            Err(e) => {
                PROCESS_EXISTS.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let log = match LogFabric::new(core) {
            Ok(f) => f,
            Err(e) => {
                PROCESS_EXISTS.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        Ok(Self {
            leaf,
            operational,
            anomaly,
            log,
        })
    }

    #[must_use]
    pub fn leaf(&self) -> &Leaf {
        &self.leaf
    }

    #[must_use]
    pub fn operational(&self) -> &Arc<OperationalFabric> {
        &self.operational
    }

    #[must_use]
    pub fn anomaly(&self) -> &Arc<AnomalyFabric> {
        &self.anomaly
    }

    #[must_use]
    pub fn log(&self) -> &Arc<LogFabric> {
        &self.log
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        PROCESS_EXISTS.store(false, Ordering::SeqCst);
    }
}
