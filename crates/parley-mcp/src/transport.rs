//! Tool-server transports.
//!
//! [`McpTransport`] abstracts JSON-RPC delivery; two implementations:
//!
//! - [`StdioTransport`]: a child process owned by two background tasks,
//!   a writer draining an outgoing queue into stdin and a reader
//!   routing stdout lines to waiting callers by request id
//! - [`HttpTransport`]: HTTP POST with configured headers
//!
//! The stdio design keeps no locks around the pipes themselves: callers
//! never touch stdin or stdout, they enqueue a line and wait on a
//! per-request channel. When the process dies, both tasks wind down and
//! every waiter gets an error instead of hanging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{McpError, Result};
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Transport layer for JSON-RPC communication with one server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and return the response.
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no `id`, no response expected).
    async fn send_notification(&self, method: &str, params: serde_json::Value) -> Result<()>;
}

/// Default wait for a response before a request is abandoned.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outgoing-queue depth; enough to absorb a discovery burst.
const OUTGOING_QUEUE_DEPTH: usize = 64;

/// Routes responses read from stdout to the caller waiting on that
/// request id.
///
/// A plain mutex is enough here: every critical section is a map
/// insert/remove with nothing awaited inside.
#[derive(Default)]
struct ResponseRouter {
    waiting: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
}

impl ResponseRouter {
    /// Register interest in a request id before the line is written,
    /// so the answer cannot race past us.
    fn subscribe(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().expect("router poisoned").insert(id, tx);
        rx
    }

    /// Hand a response to its waiter, if any.
    fn resolve(&self, response: JsonRpcResponse) {
        let waiter = self
            .waiting
            .lock()
            .expect("router poisoned")
            .remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!(id = response.id, "response with no pending request"),
        }
    }

    /// Forget a request that timed out or could not be written.
    fn abandon(&self, id: u64) {
        self.waiting.lock().expect("router poisoned").remove(&id);
    }

    /// Drop every waiter; their receivers resolve to an error.
    fn shutdown(&self) {
        self.waiting.lock().expect("router poisoned").clear();
    }
}

/// Transport that speaks to a child process over stdin/stdout.
pub struct StdioTransport {
    outgoing: mpsc::Sender<String>,
    router: Arc<ResponseRouter>,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the server process and start the writer and reader tasks.
    ///
    /// The child is killed when this transport is dropped; there is no
    /// explicit shutdown call.
    pub async fn new(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdout".into()))?;

        let (outgoing, outbox) = mpsc::channel::<String>(OUTGOING_QUEUE_DEPTH);
        let router = Arc::new(ResponseRouter::default());

        // Writer: owns stdin outright, drains the queue one line at a
        // time. Exits when the queue closes or the pipe breaks.
        tokio::spawn(write_loop(stdin, outbox));

        // Reader: owns stdout, routes response lines until EOF, then
        // wakes every waiter with an error. Holding the child here
        // keeps kill_on_drop tied to the reader's lifetime.
        tokio::spawn(read_loop(child, stdout, Arc::clone(&router)));

        Ok(Self {
            outgoing,
            router,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn enqueue(&self, line: String) -> Result<()> {
        self.outgoing.send(line).await.map_err(|_| {
            McpError::Transport("server process is no longer accepting input".into())
        })
    }
}

/// Drain the outgoing queue into the child's stdin.
async fn write_loop(
    mut stdin: tokio::process::ChildStdin,
    mut outbox: mpsc::Receiver<String>,
) {
    while let Some(line) = outbox.recv().await {
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(e) = write.await {
            warn!(error = %e, "stdio writer: pipe broke, exiting");
            break;
        }
    }
    // Queue closed or pipe broke; dropping stdin signals EOF to the
    // server.
}

/// Route stdout lines to their waiters until the server goes away.
async fn read_loop(
    child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    router: Arc<ResponseRouter>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(line) {
                    Ok(response) => router.resolve(response),
                    // Server-initiated notifications and noise are not
                    // responses; skip them.
                    Err(e) => debug!(error = %e, "stdio reader: skipping non-response line"),
                }
            }
            Ok(None) => {
                debug!("stdio reader: server closed stdout");
                break;
            }
            Err(e) => {
                warn!(error = %e, "stdio reader: read failed, exiting");
                break;
            }
        }
    }
    router.shutdown();
    drop(child);
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id;
        let line = serde_json::to_string(&request)?;
        debug!(method = %request.method, id, "sending stdio request");

        // Subscribe before writing so a fast reply cannot be dropped.
        let reply = self.router.subscribe(id);
        if let Err(e) = self.enqueue(line).await {
            self.router.abandon(id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::Transport(
                "server exited before answering".into(),
            )),
            Err(_) => {
                self.router.abandon(id);
                Err(McpError::Transport(format!(
                    "request {id} timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        }
    }

    async fn send_notification(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        debug!(method = %method, "sending stdio notification");
        self.enqueue(serde_json::to_string(&notif)?).await
    }
}

/// Transport that communicates via HTTP POST.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
}

impl HttpTransport {
    /// Create a new HTTP transport targeting the given endpoint.
    pub fn new(endpoint: String, headers: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            headers,
        }
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        let mut req = self.client.post(&self.endpoint);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        debug!(
            method = %request.method,
            id = request.id,
            endpoint = %self.endpoint,
            "sending HTTP request"
        );

        let resp = self
            .request_builder()
            .json(&request)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("HTTP request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {body}")));
        }

        resp.json()
            .await
            .map_err(|e| McpError::Transport(format!("failed to parse response: {e}")))
    }

    async fn send_notification(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let notif = JsonRpcNotification::new(method, params);
        let resp = self
            .request_builder()
            .json(&notif)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("HTTP notification failed: {e}")))?;

        // Notifications are fire-and-forget; log non-success only.
        let status = resp.status();
        if !status.is_success() {
            debug!(method = %method, status = %status, "notification non-success status");
        }
        Ok(())
    }
}

/// Everything a mock transport has been asked to send.
#[cfg(test)]
pub(crate) enum Sent {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// A scripted transport for tests: responses are played back in order
/// and everything sent through it is logged.
#[cfg(test)]
pub(crate) struct MockTransport {
    script: Mutex<std::collections::VecDeque<JsonRpcResponse>>,
    log: Mutex<Vec<Sent>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(responses: Vec<JsonRpcResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// A successful response with the given id and result.
    pub fn ok(id: u64, result: serde_json::Value) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Requests sent so far, in order.
    pub fn requests(&self) -> Vec<JsonRpcRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|sent| match sent {
                Sent::Request(r) => Some(r.clone()),
                Sent::Notification(_) => None,
            })
            .collect()
    }

    /// Notifications sent so far, in order.
    pub fn notifications(&self) -> Vec<JsonRpcNotification> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|sent| match sent {
                Sent::Notification(n) => Some(n.clone()),
                Sent::Request(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl McpTransport for MockTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.log.lock().unwrap().push(Sent::Request(request));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| McpError::Transport("mock script exhausted".into()))
    }

    async fn send_notification(&self, method: &str, params: serde_json::Value) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Sent::Notification(JsonRpcNotification::new(method, params)));
        Ok(())
    }
}
