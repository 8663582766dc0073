//! MCP transport layer
//!
//! Supports stdio and HTTP transports for MCP server communication.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::McpError;

const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

fn notification(method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params }),
        None => serde_json::json!({ "jsonrpc": "2.0", "method": method }),
    }
}

/// Pick the response to `request_id` out of an incoming message.
///
/// Server notifications and server-to-client requests carry a `method` and
/// are skipped, as are responses to other ids.
fn match_response(value: Value, request_id: u64) -> Result<Option<JsonRpcResponse>, McpError> {
    if value.get("method").is_some() {
        debug!(method = ?value.get("method"), "Skipping server-initiated message");
        return Ok(None);
    }
    if value.get("id").is_none() {
        return Ok(None);
    }

    let response: JsonRpcResponse = serde_json::from_value(value)?;
    if response.id == Some(request_id) {
        Ok(Some(response))
    } else {
        Ok(None)
    }
}

/// Transport trait for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for response
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Check if transport is still connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&self) -> Result<(), McpError>;
}

/// Server stdout plus any line left half-read by a cancelled request
struct LineReader {
    reader: BufReader<ChildStdout>,
    pending: Vec<u8>,
}

/// Stdio transport for MCP servers running as child processes
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<LineReader>,
    child: Mutex<Child>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create a new stdio transport from a running process
    pub fn new(server: &str, mut child: Child) -> Result<Self, McpError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdin of MCP server".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("failed to capture stdout of MCP server".into()))?;

        // Drain stderr so a chatty server never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "{}", line);
                }
            });
        }

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(LineReader {
                reader: BufReader::new(stdout),
                pending: Vec::new(),
            }),
            child: Mutex::new(child),
            connected: AtomicBool::new(true),
        })
    }

    /// Spawn a new process and create transport
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&Path>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?;

        Self::new(server, child)
    }

    /// Read a line from stdout, parsing as JSON.
    ///
    /// Bytes accumulate in `pending` until a newline arrives, so a read
    /// dropped by a timeout resumes where it stopped on the next request.
    async fn read_message(&self) -> Result<Value, McpError> {
        let mut stdout = self.stdout.lock().await;
        let LineReader { reader, pending } = &mut *stdout;

        loop {
            // MCP uses newline-delimited JSON
            let read = reader.read_until(b'\n', pending).await?;
            if read == 0 {
                self.connected.store(false, Ordering::SeqCst);
                return Err(McpError::Closed);
            }
            if pending.last() != Some(&b'\n') {
                continue;
            }

            let line = std::mem::take(pending);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(serde_json::from_slice(&line)?);
        }
    }

    /// Write a message to stdin
    async fn write_message(&self, value: &Value) -> Result<(), McpError> {
        let mut stdin = self.stdin.lock().await;
        let json = serde_json::to_string(value)?;

        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        if !self.is_connected() {
            return Err(McpError::Closed);
        }

        let request_id = request.id;
        self.write_message(&serde_json::to_value(&request)?).await?;

        // Read messages until we get the response matching our id
        loop {
            let message = self.read_message().await?;
            if let Some(response) = match_response(message, request_id)? {
                return Ok(response);
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.write_message(&notification(method, params)).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);

        let mut child = self.child.lock().await;
        let _ = child.kill().await;

        Ok(())
    }
}

/// HTTP transport for remote MCP servers
///
/// Each message is a POST; responses may be plain JSON or a short
/// server-sent-event stream.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    session_id: std::sync::Mutex<Option<String>>,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create a new HTTP transport; `headers` are sent verbatim on every request
    pub fn new(url: impl Into<String>, headers: &BTreeMap<String, String>) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| McpError::Transport(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| McpError::Transport(format!("invalid value for header '{}'", key)))?;
            header_map.insert(name, value);
        }
        header_map.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        Ok(Self {
            url: url.into(),
            client: reqwest::Client::new(),
            headers: header_map,
            session_id: std::sync::Mutex::new(None),
            connected: AtomicBool::new(true),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, McpError> {
        let mut builder = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(body);
        if let Some(id) = self.session_id() {
            builder = builder.header(SESSION_HEADER, id);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "MCP server returned error status: {}",
                response.status()
            )));
        }

        if let Some(id) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(id.to_string());
            }
        }

        Ok(response)
    }
}

/// Extract JSON payloads from the `data:` lines of an event stream
fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            if let Ok(value) = serde_json::from_str(&data) {
                messages.push(value);
            }
            data.clear();
        }
    }

    messages
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let request_id = request.id;
        let response = self.post(&serde_json::to_value(&request)?).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let messages = if is_event_stream {
            parse_sse_messages(&body)
        } else {
            vec![serde_json::from_str(&body)?]
        };

        for message in messages {
            if let Some(response) = match_response(message, request_id)? {
                return Ok(response);
            }
        }

        Err(McpError::Protocol(format!(
            "no response for request {} in HTTP reply",
            request_id
        )))
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.post(&notification(method, params)).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(10);

    fn sh(script: &str) -> StdioTransport {
        let args = vec!["-c".to_string(), script.to_string()];
        StdioTransport::spawn("fake", "sh", &args, &BTreeMap::new(), None).unwrap()
    }

    type SeenHeaders = Arc<StdMutex<Vec<BTreeMap<String, String>>>>;

    /// Answers `initialize` with plain JSON and a session id, notifications
    /// with 202, and anything else with an event stream
    async fn serve_mcp(listener: TcpListener, seen: SeenHeaders) {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }

                    let mut headers = BTreeMap::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let header = line.trim_end();
                        if header.is_empty() {
                            break;
                        }
                        if let Some((key, value)) = header.split_once(':') {
                            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
                        }
                    }

                    let length = headers
                        .get("content-length")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let mut body = vec![0u8; length];
                    if reader.read_exact(&mut body).await.is_err() {
                        return;
                    }
                    let message: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    seen.lock().unwrap().push(headers);

                    let reply = match (message.get("id"), message["method"].as_str()) {
                        (None, _) => "HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n".to_string(),
                        (Some(id), Some("initialize")) => {
                            let body = json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": {
                                    "protocolVersion": "2024-11-05",
                                    "capabilities": {},
                                    "serverInfo": {"name": "remote"}
                                }
                            })
                            .to_string();
                            format!(
                                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nmcp-session-id: sess-7\r\ncontent-length: {}\r\n\r\n{}",
                                body.len(),
                                body
                            )
                        }
                        (Some(id), _) => {
                            let log = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}});
                            let result = json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": {"content": [{"type": "text", "text": "remote hit"}]}
                            });
                            let body = format!(
                                "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                                log, result
                            );
                            format!(
                                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n{}",
                                body.len(),
                                body
                            )
                        }
                    };
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_stdio_skips_notifications_and_drains_stderr() {
        let transport = sh(r#"
yes noise | head -n 20000 >&2
read -r line
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'
echo ''
echo '{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}'
read -r line
"#);

        let response = tokio::time::timeout(
            WAIT,
            transport.send_request(JsonRpcRequest::new(7, "tools/list", None)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.id, Some(7));
        assert!(response.result.unwrap()["tools"].as_array().unwrap().is_empty());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stdio_resumes_line_after_timed_out_request() {
        let transport = sh(r#"
read -r line
printf '%s' '{"jsonrpc":"2.0",'
sleep 1
echo '"id":1,"result":{"n":1}}'
read -r line
echo '{"jsonrpc":"2.0","id":2,"result":{"n":2}}'
read -r line
"#);

        let first = tokio::time::timeout(
            Duration::from_millis(300),
            transport.send_request(JsonRpcRequest::new(1, "tools/call", None)),
        )
        .await;
        assert!(first.is_err());

        let second = tokio::time::timeout(
            WAIT,
            transport.send_request(JsonRpcRequest::new(2, "tools/call", None)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(second.id, Some(2));
        assert_eq!(second.result.unwrap()["n"], 2);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stdio_close_kills_server() {
        let transport = sh("exec sleep 30");
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        // The killed server's stdout reaches end of file well before `sleep` would finish
        let read = tokio::time::timeout(WAIT, transport.read_message()).await.unwrap();
        assert!(matches!(read, Err(McpError::Closed)));
        assert!(matches!(
            transport.send_request(JsonRpcRequest::new(1, "ping", None)).await,
            Err(McpError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_http_forwards_headers_and_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        let seen: SeenHeaders = Arc::new(StdMutex::new(Vec::new()));
        tokio::spawn(serve_mcp(listener, Arc::clone(&seen)));

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer tok".to_string());
        headers.insert("X-Tenant".to_string(), "acme".to_string());
        let transport = HttpTransport::new(url, &headers).unwrap();

        let init = transport
            .send_request(JsonRpcRequest::new(1, "initialize", Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(init.result.unwrap()["serverInfo"]["name"], "remote");

        transport
            .send_notification("notifications/initialized", None)
            .await
            .unwrap();

        let call = transport
            .send_request(JsonRpcRequest::new(
                2,
                "tools/call",
                Some(json!({"name": "lookup", "arguments": {}})),
            ))
            .await
            .unwrap();
        assert_eq!(call.id, Some(2));
        assert_eq!(call.result.unwrap()["content"][0]["text"], "remote hit");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for request in seen.iter() {
            assert_eq!(request["authorization"], "Bearer tok");
            assert_eq!(request["x-tenant"], "acme");
            assert!(request["accept"].contains("text/event-stream"));
        }
        assert!(!seen[0].contains_key("mcp-session-id"));
        assert_eq!(seen[1]["mcp-session-id"], "sess-7");
        assert_eq!(seen[2]["mcp-session-id"], "sess-7");
    }

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest::new(1, "tools/list", Some(json!({"cursor": null})));

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
    }

    #[test]
    fn test_notification_omits_missing_params() {
        let value = notification("notifications/initialized", None);
        assert!(value.get("params").is_none());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_match_response_skips_other_messages() {
        let log = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}});
        assert!(match_response(log, 3).unwrap().is_none());

        let server_request = json!({"jsonrpc": "2.0", "id": 3, "method": "roots/list"});
        assert!(match_response(server_request, 3).unwrap().is_none());

        let other = json!({"jsonrpc": "2.0", "id": 2, "result": {}});
        assert!(match_response(other, 3).unwrap().is_none());

        let ours = json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}});
        let response = match_response(ours, 3).unwrap().unwrap();
        assert_eq!(response.result.unwrap()["ok"], true);
    }

    #[test]
    fn test_parse_sse_messages() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n: keep-alive\n\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n";
        let messages = parse_sse_messages(body);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], 1);
        assert_eq!(messages[1]["method"], "x");
    }

    #[test]
    fn test_http_transport_rejects_bad_header() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(HttpTransport::new("http://localhost", &headers).is_err());
    }

    #[test]
    fn test_rpc_error_conversion_keeps_code() {
        let err: McpError = JsonRpcError {
            code: -32602,
            message: "Invalid params".to_string(),
            data: Some(json!({"field": "query"})),
        }
        .into();
        assert_eq!(err.code(), Some(-32602));
        assert_eq!(err.data().unwrap()["field"], "query");
    }
}
