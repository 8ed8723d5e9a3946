//! LSP Transport Layer
//!
//! Content-Length message framing over any byte stream, plus the
//! `Transport` seam that turns a server description into a connected
//! stream pair (and, for spawned servers, a process handle).

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use super::protocol::{Message, Notification, Request, Response};
use crate::error::LspError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Largest frame body accepted from a server
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Reads framed messages from the server side of a connection
pub struct MessageReader {
    reader: BufReader<BoxedReader>,
}

impl MessageReader {
    pub fn new(reader: BoxedReader) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message from the server
    ///
    /// LSP messages are framed with headers:
    /// ```text
    /// Content-Length: 123\r\n
    /// \r\n
    /// {"jsonrpc":"2.0",...}
    /// ```
    pub async fn read_message(&mut self) -> io::Result<Message> {
        let body = self.read_frame().await?;
        decode_body(body)
    }

    /// Read one complete frame body. An error here means the stream can no
    /// longer be trusted to be in sync.
    pub async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        let content_length = self.read_headers().await?;

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        Ok(body)
    }

    /// Read headers and return Content-Length
    async fn read_headers(&mut self) -> io::Result<usize> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Server closed connection",
                ));
            }

            let line = line.trim();

            if line.is_empty() {
                // Tolerate stray blank lines before the first header
                if content_length.is_none() {
                    continue;
                }
                break;
            }

            if let Some(value) = line.strip_prefix("Content-Length:") {
                let length: usize = value
                    .trim()
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                if length > MAX_CONTENT_LENGTH {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Content-Length {} exceeds {}", length, MAX_CONTENT_LENGTH),
                    ));
                }
                content_length = Some(length);
            }
            // Other headers (Content-Type) carry nothing we need
        }

        content_length
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Missing Content-Length"))
    }
}

/// Decode a frame body. A failure leaves the framing intact.
pub fn decode_body(body: Vec<u8>) -> io::Result<Message> {
    let json =
        String::from_utf8(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    tracing::trace!("LSP <- {}", json);

    Message::parse(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let json = serde_json::to_string(request)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_message(writer, &json).await
}

pub async fn write_notification<W>(writer: &mut W, notification: &Notification) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let json = serde_json::to_string(notification)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_message(writer, &json).await
}

/// Write a response to a server-initiated request
pub async fn write_response<W>(writer: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let json = serde_json::to_string(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_message(writer, &json).await
}

/// Write a raw JSON message with LSP framing
pub async fn write_message<W>(writer: &mut W, json: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    tracing::trace!("LSP -> {}", json);

    let message = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await
}

// ============================================================================
// Launch targets and process handles
// ============================================================================

/// How to reach a language server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Spawn a process and talk over its stdio
    Command {
        program: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Connect to an already running server
    Socket(SocketAddr),
}

/// What a provider hands back when it accepts a content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescription {
    pub name: String,
    pub target: LaunchTarget,
}

impl ServerDescription {
    pub fn command(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            target: LaunchTarget::Command {
                program: program.into(),
                args,
                env: HashMap::new(),
            },
        }
    }

    pub fn socket(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            target: LaunchTarget::Socket(addr),
        }
    }
}

/// OS process backing a session
pub trait ProcessHandle: Send + Sync {
    fn id(&self) -> Option<u32>;

    fn is_alive(&self) -> bool;

    /// Force termination. Must not block.
    fn kill(&self);
}

impl fmt::Debug for dyn ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Poll until the process exits or `limit` elapses. Returns whether it exited.
pub async fn wait_for_exit(process: &dyn ProcessHandle, limit: Duration, poll: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !process.is_alive() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Spawned server process
pub struct ChildProcess {
    child: Mutex<Child>,
    pid: Option<u32>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Mutex::new(child),
            pid,
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        // An error while checking counts as dead
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    fn kill(&self) {
        if let Err(e) = self.child.lock().start_kill() {
            tracing::debug!("Kill of server process {:?} failed: {}", self.pid, e);
        }
    }
}

/// A connected server stream pair
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub process: Option<Arc<dyn ProcessHandle>>,
}

/// Opens connections to language servers
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        description: &ServerDescription,
        root: &Path,
    ) -> Result<Connection, LspError>;
}

/// Process stdio for commands, TCP for sockets
#[derive(Debug, Default, Clone)]
pub struct DefaultTransport;

impl DefaultTransport {
    async fn spawn(
        name: &str,
        program: &str,
        args: &[String],
        env: &HashMap<String, String>,
        root: &Path,
    ) -> Result<Connection, LspError> {
        tracing::info!("Starting {} language server: {} {:?}", name, program, args);

        let cwd: PathBuf = if root.is_dir() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?
        };

        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LspError::Launch(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::Launch("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::Launch("Failed to get stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("{} stderr: {}", name, line);
                }
            });
        }

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(Arc::new(ChildProcess::new(child))),
        })
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn open(
        &self,
        description: &ServerDescription,
        root: &Path,
    ) -> Result<Connection, LspError> {
        match &description.target {
            LaunchTarget::Command { program, args, env } => {
                Self::spawn(&description.name, program, args, env, root).await
            }
            LaunchTarget::Socket(addr) => {
                tracing::info!("Connecting to {} at {}", description.name, addr);
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| LspError::Launch(format!("{}: {}", addr, e)))?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(Connection {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    process: None,
                })
            }
        }
    }
}
