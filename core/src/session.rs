//! Per-server session reactor
//!
//! A session owns one connection and its [`Client`]. Inbound lines, fired
//! timers and control requests from the driver are all handled on the
//! session's own task, one at a time. Outbound messages are written by a
//! separate writer task in the order they were queued.

use crate::connection::{self, ConnectionStream};
use crate::{Client, ClientHandle, Error, Message, ModuleCatalog, Result, Scheduler, ServerConfig, TimerTarget};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Longest line accepted from the server, terminator included
///
/// Anything longer is discarded up to its newline without being buffered.
pub const MAX_LINE_LENGTH: usize = 8192;
/// How long a shutting-down session waits for its QUIT to be written
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests the driver can make of a running session
#[derive(Debug, Clone)]
pub enum Control {
    /// Apply a new server configuration
    Reconfigure(ServerConfig),
    /// Quit and end the session
    Shutdown,
}

/// One server connection and the state machine driving it
pub struct Session {
    id: Uuid,
    client: Client,
    outbound: mpsc::UnboundedReceiver<Message>,
    timers: mpsc::UnboundedReceiver<TimerTarget>,
    control: mpsc::UnboundedReceiver<Control>,
}

impl Session {
    /// Create a session for `server`, controlled through `control`
    pub fn new(
        server: &ServerConfig,
        catalog: ModuleCatalog,
        control: mpsc::UnboundedReceiver<Control>,
    ) -> Result<Self> {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (scheduler, timers) = Scheduler::new();
        let client = Client::new(server, catalog, ClientHandle::new(outbound_tx, scheduler))?;

        Ok(Self {
            id: Uuid::new_v4(),
            client,
            outbound,
            timers,
            control,
        })
    }

    /// Create a session and run it on its own task
    pub fn spawn(server: &ServerConfig, catalog: ModuleCatalog) -> Result<SessionHandle> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let session = Session::new(server, catalog, control_rx)?;
        let id = session.id;
        let task = tokio::spawn(session.run());

        Ok(SessionHandle {
            id,
            server: server.server.clone(),
            control: control_tx,
            task,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Connect to the server and run until the link ends
    pub async fn run(mut self) -> Result<()> {
        self.client.on_connecting();
        let info = self.client.connect_info().clone();
        tracing::info!("Session {} connecting to {}", self.id, info);

        match connection::connect(&info).await {
            Ok(stream) => self.run_on(stream).await,
            Err(e) => {
                self.client.on_transport_error(&e);
                Err(e)
            }
        }
    }

    /// Run the protocol over an already established stream
    pub async fn run_on(self, stream: Box<dyn ConnectionStream>) -> Result<()> {
        let Session {
            id,
            mut client,
            mut outbound,
            mut timers,
            mut control,
        } = self;

        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let line = message.to_string();
                tracing::debug!(">> {}", line);
                if let Err(e) = write_half.write_all(format!("{}\r\n", line).as_bytes()).await {
                    tracing::error!("Session {} write failed: {}", id, e);
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let writer_abort = writer.abort_handle();

        client.on_connect();

        let mut buf = Vec::new();
        let mut discarding = false;
        let mut shutting_down = false;
        let result = loop {
            let mut limited = (&mut reader).take(MAX_LINE_LENGTH.saturating_sub(buf.len()) as u64);
            tokio::select! {
                read = limited.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => {
                        tracing::info!("Session {}: server closed the connection", id);
                        break Ok(());
                    }
                    Ok(_) => {
                        let complete = buf.last() == Some(&b'\n');
                        if !complete && buf.len() >= MAX_LINE_LENGTH {
                            if !discarding {
                                tracing::warn!("Session {}: dropping line longer than {} bytes", id, MAX_LINE_LENGTH);
                            }
                            discarding = true;
                        } else if discarding {
                            // Tail of a line already dropped
                            discarding = false;
                        } else {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end_matches(['\r', '\n']);
                            if !line.is_empty() {
                                tracing::debug!("<< {}", line);
                                if let Err(e) = client.handle_line(line) {
                                    break Err(e);
                                }
                            }
                        }
                        buf.clear();
                    }
                    Err(e) => {
                        let e = Error::from(e);
                        client.on_transport_error(&e);
                        break Err(e);
                    }
                },
                Some(target) = timers.recv() => client.handle_timer(target),
                request = control.recv() => match request {
                    Some(Control::Reconfigure(server)) => {
                        let actions = client.update_config(&server);
                        tracing::info!("Session {}: reconfigured ({} actions)", id, actions.len());
                    }
                    Some(Control::Shutdown) | None => {
                        client.shutdown("Shutting down");
                        shutting_down = true;
                        break Ok(());
                    }
                },
            }
        };

        client.on_disconnect();
        drop(client);

        if shutting_down {
            if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
                tracing::debug!("Session {}: gave up flushing outbound queue", id);
                writer_abort.abort();
            }
        } else {
            writer.abort();
        }

        match &result {
            Ok(()) => tracing::info!("Session {} ended", id),
            Err(e) => tracing::error!("Session {} failed: {}", id, e),
        }
        result
    }
}

/// The driver's handle to a spawned session
pub struct SessionHandle {
    id: Uuid,
    server: String,
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Ask the session to apply a new configuration
    pub fn reconfigure(&self, server: ServerConfig) -> bool {
        self.control.send(Control::Reconfigure(server)).is_ok()
    }

    /// Ask the session to quit
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to end
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Connection(format!("session task for {} failed: {}", self.server, e))),
        }
    }

    /// Handle for aborting the session task without waiting on it
    pub fn abort_handle(&self) -> tokio::task::AbortHandle {
        self.task.abort_handle()
    }
}
