use crate::error::{Result, RussoundError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Terminator appended to every outbound command
const LINE_TERMINATOR: &str = "\r";

/// Byte stream a RIO session runs over
pub trait RioStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RioStream for T {}

/// Boxed stream returned by a [`Connector`]
pub type BoxedStream = Box<dyn RioStream>;

/// Opens the byte stream to a controller
///
/// [`TcpConnector`] covers network deployments. RS-232 deployments can
/// implement this trait over any serial port type that is `AsyncRead +
/// AsyncWrite`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh stream; called again on every reconnect attempt
    async fn connect(&self) -> std::io::Result<BoxedStream>;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Connects to a controller over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Connector for `host:port`; nothing is opened until connect
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port, usually [`DEFAULT_PORT`](crate::DEFAULT_PORT)
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport state as seen by listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Event produced by the read loop
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// A raw line, terminator included
    Line(Vec<u8>),
    /// The stream reached EOF or failed
    Closed,
}

/// Handle the multiplexer writes command text into
pub(crate) type CommandSink = mpsc::UnboundedSender<String>;

/// One open stream to the controller
///
/// Owns a read loop forwarding raw lines as [`TransportEvent`]s and a write
/// loop draining the command sink. Replaced on every reconnect.
pub(crate) struct Connection {
    sink: CommandSink,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    state: Arc<watch::Sender<ConnectionState>>,
    closed: bool,
}

impl Connection {
    /// Open the stream and start the read and write loops
    pub async fn open(
        connector: &dyn Connector,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Result<Self> {
        let endpoint = connector.endpoint();
        tracing::debug!("Connecting to {}", endpoint);
        state.send_replace(ConnectionState::Connecting);

        let stream = match timeout(connect_timeout, connector.connect()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                state.send_replace(ConnectionState::Disconnected);
                return Err(RussoundError::Io(e));
            }
            Err(_) => {
                state.send_replace(ConnectionState::Disconnected);
                return Err(RussoundError::Timeout);
            }
        };

        let (reader, mut writer) = tokio::io::split(stream);
        let (sink, mut sink_rx) = mpsc::unbounded_channel::<String>();

        let write_events = events.clone();
        let write_task = tokio::spawn(async move {
            while let Some(command) = sink_rx.recv().await {
                let line = format!("{}{}", command, LINE_TERMINATOR);
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                };
                if let Err(e) = written.await {
                    tracing::error!("Failed to send command: {}", e);
                    let _ = write_events.send(TransportEvent::Closed);
                    break;
                }
            }
        });

        let read_state = state.clone();
        let read_task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => {
                        tracing::info!("Connection closed by device");
                        break;
                    }
                    Ok(_) => {
                        if events.send(TransportEvent::Line(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Read error: {}", e);
                        break;
                    }
                }
            }
            read_state.send_replace(ConnectionState::Disconnected);
            let _ = events.send(TransportEvent::Closed);
        });

        tracing::info!("Connected to {}", endpoint);
        state.send_replace(ConnectionState::Connected);

        Ok(Self {
            sink,
            read_task,
            write_task,
            state,
            closed: false,
        })
    }

    /// Sink for command text; valid until the connection closes
    pub fn sink(&self) -> CommandSink {
        self.sink.clone()
    }

    /// Stop both loops and drop the stream. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state.send_replace(ConnectionState::Closing);
        self.read_task.abort();
        self.write_task.abort();
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
