//! A supervisor that keeps one outbound TCP connection to a configured
//! peer alive (spec §4.7): `Stopped -> Connecting -> Connected -> Waiting
//! -> Connecting -> ...`, with a failed connect attempt also landing in
//! `Waiting` rather than surfacing to the caller.
//!
//! Mirrors the thread-with-shutdown-flag idiom [`super::tcp`]'s
//! heartbeat/reader threads use: one background thread owns the whole
//! state machine and is torn down by [`AutoConnectingTcpClient::destroy`].

use crate::config::ConnectionTarget;
use crate::endpoint::EndpointCore;
use crate::error::{Error, ErrorFamily};
use crate::wire::Handshake;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::tcp::TcpConnection;

/// Where the supervisor's retry loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoConnectState {
    Stopped,
    Connecting,
    Connected,
    Waiting,
}

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

type ConnectHandler = Box<dyn Fn(Result<Arc<TcpConnection>, Error>) + Send + Sync>;
type DisconnectHandler = Box<dyn Fn(Error) + Send + Sync>;

struct Shared {
    state: Mutex<AutoConnectState>,
    shutdown: AtomicBool,
    connect_observer: Mutex<Option<ConnectHandler>>,
    disconnect_observer: Mutex<Option<DisconnectHandler>>,
    active: Mutex<Option<Arc<TcpConnection>>>,
}

/// Supervises a single [`TcpConnection`] to `target`, reconnecting one
/// second after any failure or loss (spec §4.7's `AutoConnectingTcpClient`).
pub struct AutoConnectingTcpClient {
    shared: Arc<Shared>,
}

impl AutoConnectingTcpClient {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AutoConnectState::Stopped),
                shutdown: AtomicBool::new(false),
                connect_observer: Mutex::new(None),
                disconnect_observer: Mutex::new(None),
                active: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn state(&self) -> AutoConnectState {
        *self.shared.state.lock()
    }

    /// Registers the callback fired every time a connect attempt settles,
    /// success or failure. Replaces any previously registered callback.
    pub fn connect_observer(&self, handler: impl Fn(Result<Arc<TcpConnection>, Error>) + Send + Sync + 'static) {
        *self.shared.connect_observer.lock() = Some(Box::new(handler));
    }

    /// Registers the callback fired once each time an established
    /// connection dies (lost, not a clean [`Self::destroy`]).
    pub fn disconnect_observer(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        *self.shared.disconnect_observer.lock() = Some(Box::new(handler));
    }

    /// Starts the supervisor thread against `endpoint`/`target`. A second
    /// call while already running is a no-op.
    pub fn start(
        self: &Arc<Self>,
        endpoint: Arc<EndpointCore>,
        target: ConnectionTarget,
        handshake: Handshake,
        connect_timeout: Option<Duration>,
    ) {
        {
            let mut state = self.shared.state.lock();
            if *state != AutoConnectState::Stopped {
                return;
            }
            *state = AutoConnectState::Connecting;
        }
        let this = Arc::clone(self);
        std::thread::spawn(move || this.run(endpoint, target, handshake, connect_timeout));
    }

    fn run(
        self: Arc<Self>,
        endpoint: Arc<EndpointCore>,
        target: ConnectionTarget,
        handshake: Handshake,
        connect_timeout: Option<Duration>,
    ) {
        loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            *self.shared.state.lock() = AutoConnectState::Connecting;
            let outcome = super::tcp::TcpClient::connect(&target).and_then(|conn| {
                conn.assign(Arc::clone(&endpoint), handshake.clone(), connect_timeout)?;
                Ok(conn)
            });

            if self.shared.shutdown.load(Ordering::Acquire) {
                if let Ok(conn) = &outcome {
                    conn.destroy();
                }
                return;
            }

            match outcome {
                Ok(conn) => {
                    *self.shared.state.lock() = AutoConnectState::Connected;
                    *self.shared.active.lock() = Some(Arc::clone(&conn));
                    if let Some(cb) = self.shared.connect_observer.lock().as_ref() {
                        cb(Ok(Arc::clone(&conn)));
                    }
                    self.await_loss(&conn);
                    *self.shared.active.lock() = None;
                    if self.shared.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                }
                Err(err) => {
                    let transient = err.family() == ErrorFamily::TransientIo;
                    if let Some(cb) = self.shared.connect_observer.lock().as_ref() {
                        cb(Err(err));
                    }
                    if !transient {
                        return;
                    }
                }
            }

            *self.shared.state.lock() = AutoConnectState::Waiting;
            std::thread::sleep(RETRY_BACKOFF);
        }
    }

    /// Blocks the supervisor thread until `conn` dies, then reports the
    /// loss through [`Self::disconnect_observer`].
    fn await_loss(&self, conn: &Arc<TcpConnection>) {
        let (tx, rx) = std::sync::mpsc::channel::<Error>();
        let registered = conn.await_death(move |res| {
            let _ = tx.send(res.err().unwrap_or_else(Error::canceled));
        });
        if registered.is_err() {
            return;
        }
        if let Ok(err) = rx.recv() {
            if err.kind() != crate::error::ErrorKind::Canceled {
                if let Some(cb) = self.shared.disconnect_observer.lock().as_ref() {
                    cb(err);
                }
            }
        }
    }

    /// Stops the supervisor: signals shutdown, closes any active
    /// connection so [`Self::await_loss`] unblocks, and waits out at most
    /// one retry cycle for the background thread to notice.
    pub fn destroy(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(conn) = self.shared.active.lock().take() {
            conn.destroy();
        }
        *self.shared.state.lock() = AutoConnectState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tcp::TcpServer;
    use crate::endpoint::Leaf;
    use crate::runtime::scheduler::Scheduler;
    use crate::types::Path;
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn connects_and_reports_through_connect_observer() {
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = Arc::new(StdAtomicBool::new(false));
        let cancel2 = Arc::clone(&cancel);
        let server_thread = std::thread::spawn(move || {
            let conn = server.accept(&cancel2).unwrap();
            let sched = Scheduler::new();
            let server_leaf = Leaf::new(sched, Path::new("/server").unwrap());
            conn.assign(Arc::clone(server_leaf.core()), Handshake::new("/server"), Some(Duration::from_secs(2)))
                .unwrap();
            conn
        });

        let sched = Scheduler::new();
        let leaf = Leaf::new(sched, Path::new("/client").unwrap());
        let client = AutoConnectingTcpClient::new();
        let got = Arc::new(StdMutex::new(None));
        let got2 = Arc::clone(&got);
        client.connect_observer(move |res| {
            *got2.lock().unwrap() = Some(res.is_ok());
        });

        client.start(
            Arc::clone(leaf.core()),
            ConnectionTarget::new(addr.ip().to_string(), addr.port()),
            Handshake::new("/client"),
            Some(Duration::from_secs(2)),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(3);
        while got.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(got.lock().unwrap().take(), Some(true));
        assert_eq!(client.state(), AutoConnectState::Connected);

        client.destroy();
        server_thread.join().unwrap().destroy();
    }
}
