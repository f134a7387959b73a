use super::transport::{encode_frame, run_write_loop, FrameReader, WriteRequest};
use crate::error::{ParserError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

const WRITE_QUEUE: usize = 64;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Latest `textDocument/publishDiagnostics` payload per document URI.
#[derive(Default)]
struct PublishedDiagnostics {
    by_uri: Mutex<HashMap<String, Vec<Value>>>,
    published: Notify,
}

impl PublishedDiagnostics {
    async fn publish(&self, params: &Value) {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return;
        };
        let items = params
            .get("diagnostics")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.by_uri.lock().await.insert(uri.to_string(), items);
        self.published.notify_waiters();
    }
}

/// A live JSON-RPC connection to one language server.
///
/// Responses are routed to callers by request id from a dedicated reader task; writes go through
/// a single writer task. Once the stream ends the session is dead for good.
pub struct LspSession {
    write_tx: mpsc::Sender<WriteRequest>,
    pending: Pending,
    diagnostics: Arc<PublishedDiagnostics>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    label: String,
}

impl LspSession {
    /// Wrap an already-connected stream pair.
    pub fn connect<R, W>(read: R, write: W, label: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics = Arc::new(PublishedDiagnostics::default());
        let alive = Arc::new(AtomicBool::new(true));

        let writer_task = tokio::spawn(run_write_loop(write, write_rx));
        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(read),
            write_tx.clone(),
            Arc::clone(&pending),
            Arc::clone(&diagnostics),
            Arc::clone(&alive),
            label.clone(),
        ));

        Self {
            write_tx,
            pending,
            diagnostics,
            next_id: AtomicU64::new(1),
            alive,
            reader_task,
            writer_task,
            child: Mutex::new(None),
            label,
        }
    }

    /// Spawn `command` with piped stdio. The binary must resolve on `PATH` (or be a path).
    pub fn spawn(command: &str, args: &[String], cwd: &Path) -> Result<Self> {
        let program = find_on_path(command).ok_or_else(|| {
            ParserError::BackendUnavailable(format!("`{command}` not found on PATH"))
        })?;

        let mut child = Command::new(&program)
            .args(args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ParserError::BackendUnavailable(format!("{command}: no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParserError::BackendUnavailable(format!("{command}: no stdout")))?;

        log::debug!("Spawned language server {} (pid {:?})", program.display(), child.id());
        let mut session = Self::connect(stdout, stdin, command);
        *session.child.get_mut() = Some(child);
        Ok(session)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn send(&self, message: &Value) -> Result<()> {
        if !self.is_alive() {
            return Err(ParserError::BackendUnavailable(format!("{}: session closed", self.label)));
        }
        let bytes = encode_frame(message)?;
        let (reply, done) = oneshot::channel();
        self.write_tx
            .send(WriteRequest { bytes, reply })
            .await
            .map_err(|_| ParserError::BackendUnavailable(format!("{}: writer stopped", self.label)))?;
        match done.await {
            Ok(result) => result.map_err(|e| {
                self.alive.store(false, Ordering::Release);
                ParserError::BackendUnavailable(format!("{}: write failed: {e}", self.label))
            }),
            Err(_) => Err(ParserError::BackendUnavailable(format!("{}: writer stopped", self.label))),
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    /// Send a request and wait up to `timeout` for its response. On timeout the server is asked
    /// to cancel the request and the caller gets [`ParserError::Timeout`].
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        if let Err(e) = self.send(&message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ParserError::BackendUnavailable(format!(
                "{}: connection closed during {method}",
                self.label
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                if let Err(e) = self.notify("$/cancelRequest", json!({ "id": id })).await {
                    log::debug!("{}: cancel of request {id} not delivered: {e}", self.label);
                }
                Err(ParserError::Timeout {
                    method: method.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Drop whatever was published for `uri`, so the next [`take_diagnostics`] only sees
    /// diagnostics for the content opened after this call.
    ///
    /// [`take_diagnostics`]: LspSession::take_diagnostics
    pub async fn forget_diagnostics(&self, uri: &str) {
        self.diagnostics.by_uri.lock().await.remove(uri);
    }

    /// Remove and return the diagnostics published for `uri`, waiting up to `wait` for the server
    /// to publish them. `None` if nothing arrived.
    pub async fn take_diagnostics(&self, uri: &str, wait: Duration) -> Option<Vec<Value>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let published = self.diagnostics.published.notified();
            if let Some(items) = self.diagnostics.by_uri.lock().await.remove(uri) {
                return Some(items);
            }
            if !self.is_alive() || tokio::time::timeout_at(deadline, published).await.is_err() {
                return None;
            }
        }
    }

    /// `initialize` + `initialized`. Returns the server capabilities.
    pub async fn initialize(&self, root: &Path, timeout: Duration) -> Result<Value> {
        let root_uri = file_uri(root);
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace");
        let params = json!({
            "processId": std::process::id(),
            "rootUri": root_uri,
            "workspaceFolders": [{ "uri": root_uri, "name": name }],
            "capabilities": {
                "textDocument": {
                    "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
                    "publishDiagnostics": { "relatedInformation": false },
                    "synchronization": { "didSave": false, "dynamicRegistration": false }
                },
                "workspace": { "configuration": true, "workspaceFolders": true }
            },
            "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }
        });

        let result = self.request("initialize", params, timeout).await?;
        let capabilities = result
            .get("capabilities")
            .cloned()
            .ok_or_else(|| ParserError::protocol("initialize result has no capabilities"))?;
        self.notify("initialized", json!({})).await?;
        Ok(capabilities)
    }

    /// Polite `shutdown`/`exit`, then make sure the process is gone.
    pub async fn shutdown(&self) {
        if self.is_alive() {
            if let Err(e) = self.request("shutdown", Value::Null, SHUTDOWN_TIMEOUT).await {
                log::debug!("{}: shutdown request failed: {e}", self.label);
            }
            let _ = self.notify("exit", Value::Null).await;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => log::debug!("{}: exited with {status}", self.label),
                _ => {
                    if let Err(e) = child.kill().await {
                        log::warn!("{}: failed to kill language server: {e}", self.label);
                    }
                }
            }
        }
        self.alive.store(false, Ordering::Release);
    }
}

impl Drop for LspSession {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    write_tx: mpsc::Sender<WriteRequest>,
    pending: Pending,
    diagnostics: Arc<PublishedDiagnostics>,
    alive: Arc<AtomicBool>,
    label: String,
) {
    loop {
        let message = match reader.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                log::debug!("{label}: server closed its output");
                break;
            }
            Err(e) => {
                log::warn!("{label}: unreadable server output: {e}");
                break;
            }
        };

        let method = message.get("method").and_then(Value::as_str);
        let id = message.get("id");
        match (method, id) {
            // Server-to-client request: answer with null so the server never blocks on us.
            (Some(method), Some(id)) => {
                log::debug!("{label}: answering server request {method} with null");
                let reply = json!({"jsonrpc": "2.0", "id": id, "result": null});
                if let Ok(bytes) = encode_frame(&reply) {
                    let (tx, _rx) = oneshot::channel();
                    if write_tx.send(WriteRequest { bytes, reply: tx }).await.is_err() {
                        break;
                    }
                }
            }
            (Some("textDocument/publishDiagnostics"), None) => {
                if let Some(params) = message.get("params") {
                    diagnostics.publish(params).await;
                }
            }
            (Some(method), None) => {
                log::trace!("{label}: notification {method}");
            }
            (None, Some(id)) => {
                let Some(id) = id.as_u64() else {
                    log::debug!("{label}: response with foreign id {id}");
                    continue;
                };
                let Some(waiter) = pending.lock().await.remove(&id) else {
                    continue;
                };
                let result = match message.get("error") {
                    Some(error) => Err(ParserError::protocol(format!(
                        "{}: {}",
                        error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                        error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                    ))),
                    None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = waiter.send(result);
            }
            (None, None) => log::debug!("{label}: ignoring malformed message"),
        }
    }

    alive.store(false, Ordering::Release);
    diagnostics.published.notify_waiters();
    for (_, waiter) in pending.lock().await.drain() {
        let _ = waiter.send(Err(ParserError::BackendUnavailable(format!(
            "{label}: server exited"
        ))));
    }
}

/// Resolve a command the way a shell would, without spawning anything.
pub fn find_on_path(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|path| path.is_file())
}

/// `file://` URI for an absolute path, percent-encoding everything outside the unreserved set.
pub fn file_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut uri = String::from("file://");
    if !raw.starts_with('/') {
        uri.push('/');
    }
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b':' => {
                uri.push(byte as char);
            }
            _ => uri.push_str(&format!("%{byte:02X}")),
        }
    }
    uri
}
