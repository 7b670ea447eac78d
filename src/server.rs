//! The process-wide RPC server and its helpers: the bidi-stream reactor, the plugin service
//! implementation, and the queue-draining worker.

use anyhow::Context as _;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;

use crate::registry::Instances;
use crate::rpc::grpc::plugin_service_server::PluginServiceServer;

pub(crate) mod reactor;
mod service;
pub mod worker;

use service::ClapPluginService;

/// The address the process-wide server binds when the first instance comes up: loopback with an
/// OS-assigned port. The bound port is logged and observable through [`Server::port`].
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:0";

/// How long `stop()` waits for the transport to wind down before giving up on stragglers.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    static ref SERVER: Mutex<Server> = Mutex::new(Server::new());
}

/// The server shared by every plugin instance in the process.
pub fn global() -> &'static Mutex<Server> {
    &SERVER
}

/// Bring the process-wide server up if it has never been started. Called on every instance
/// creation; the server deliberately outlives the instances so reconnecting clients don't lose
/// the transport whenever the host cycles plugins.
pub(crate) fn ensure_started() {
    let mut server = SERVER.lock();
    if server.state() == ServerState::Init {
        server.start(DEFAULT_ADDRESS);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Init,
    Running,
    Finished,
}

/// A single-shot gRPC server hosting the plugin service.
///
/// The lifecycle is `Init → Running → Finished`; a finished server can be returned to `Init`
/// with [`reset`][Self::reset] and started again, on a fresh port. The server owns its tokio
/// runtime, so the rest of the crate stays free of async plumbing.
pub struct Server {
    state: ServerState,
    runtime: Option<Runtime>,
    shutdown: Option<oneshot::Sender<()>>,
    serve_task: Option<tokio::task::JoinHandle<()>>,
    address: Option<SocketAddr>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            state: ServerState::Init,
            runtime: None,
            shutdown: None,
            serve_task: None,
            address: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// The bound port, while running. With a `:0` listen address this is the port the OS picked.
    pub fn port(&self) -> Option<u16> {
        if self.state != ServerState::Running {
            return None;
        }
        self.address.map(|address| address.port())
    }

    /// The bound socket address, while running.
    pub fn address(&self) -> Option<SocketAddr> {
        if self.state != ServerState::Running {
            return None;
        }
        self.address
    }

    /// Bind `address` and start serving. Returns `false` without touching anything when the
    /// server is not in the `Init` state or the address cannot be bound.
    pub fn start(&mut self, address: &str) -> bool {
        if self.state != ServerState::Init {
            return false;
        }

        match self.bind_and_serve(address) {
            Ok(()) => {
                self.state = ServerState::Running;
                true
            }
            Err(err) => {
                remote_error!("Could not start the RPC server on '{address}': {err:#}");
                false
            }
        }
    }

    fn bind_and_serve(&mut self, address: &str) -> anyhow::Result<()> {
        let address: SocketAddr = address.parse().context("invalid listen address")?;
        // Binding synchronously makes the OS-assigned port observable before this returns
        let listener = StdTcpListener::bind(address).context("could not bind the listener")?;
        listener
            .set_nonblocking(true)
            .context("could not configure the listener")?;
        let local_address = listener
            .local_addr()
            .context("could not read the bound address")?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("clap-remote-rpc")
            .enable_all()
            .build()
            .context("could not build the server runtime")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_task = {
            let _guard = runtime.enter();
            let listener = tokio::net::TcpListener::from_std(listener)
                .context("could not adopt the listener")?;

            runtime.spawn(async move {
                let incoming = TcpListenerStream::new(listener);
                let result = tonic::transport::Server::builder()
                    .add_service(PluginServiceServer::new(ClapPluginService))
                    .serve_with_incoming_shutdown(incoming, async {
                        let _ = shutdown_rx.await;
                    })
                    .await;

                if let Err(err) = result {
                    remote_error!("RPC server terminated with an error: {err}");
                }
            })
        };

        self.runtime = Some(runtime);
        self.shutdown = Some(shutdown_tx);
        self.serve_task = Some(serve_task);
        self.address = Some(local_address);

        remote_log!("RPC server listening on {local_address}");
        Ok(())
    }

    /// Shut the transport down. Live sessions are cancelled first so the graceful drain isn't
    /// held open by their infinite streams. Returns `false` when not running.
    pub fn stop(&mut self) -> bool {
        if self.state != ServerState::Running {
            return false;
        }

        for shared in Instances::all_shared() {
            shared.cancel_all_clients();
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let (Some(runtime), Some(serve_task)) = (self.runtime.take(), self.serve_task.take()) {
            let drained = runtime.block_on(async {
                tokio::time::timeout(SHUTDOWN_TIMEOUT, serve_task).await
            });
            if drained.is_err() {
                remote_error!("RPC server did not drain within {SHUTDOWN_TIMEOUT:?}");
            }
            // Session read tasks may still be winding down
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }

        self.state = ServerState::Finished;
        remote_log!("RPC server stopped");
        true
    }

    /// Return a finished server to `Init` so it can be started again. Refused in any other
    /// state.
    pub fn reset(&mut self) -> bool {
        if self.state != ServerState::Finished {
            return false;
        }

        self.address = None;
        self.state = ServerState::Init;
        true
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_single_shot() {
        let mut server = Server::new();
        assert_eq!(server.state(), ServerState::Init);
        assert_eq!(server.port(), None);

        assert!(server.start("127.0.0.1:0"));
        assert_eq!(server.state(), ServerState::Running);
        let first_port = server.port().expect("a bound port while running");
        assert_ne!(first_port, 0);

        // Already running: a second start is refused
        assert!(!server.start("127.0.0.1:0"));
        // And reset is only allowed once finished
        assert!(!server.reset());

        assert!(server.stop());
        assert_eq!(server.state(), ServerState::Finished);
        assert_eq!(server.port(), None);
        assert!(!server.stop());

        // Reset returns the server to Init, and a fresh start binds a fresh port
        assert!(server.reset());
        assert_eq!(server.state(), ServerState::Init);
        assert!(server.start("127.0.0.1:0"));
        assert!(server.port().is_some());
        assert!(server.stop());
    }

    #[test]
    fn start_fails_on_unparseable_address() {
        let mut server = Server::new();
        assert!(!server.start("not an address"));
        assert_eq!(server.state(), ServerState::Init);
    }
}
