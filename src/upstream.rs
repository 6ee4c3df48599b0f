use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::UpstreamSettings;
use crate::prompt::SYSTEM_PERSONA;

const DONE_LINE: &str = "data: [DONE]";
const DATA_PREFIX: &str = "data: ";
const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 2000;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },
    #[error("upstream request timed out, please retry later")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// Status line plus the still-unread body of a streaming upstream response.
/// Dropping `body` releases the underlying connection.
pub struct UpstreamResponse {
    pub status: u16,
    pub body: BoxStream<'static, Result<Bytes, UpstreamError>>,
}

/// Outbound seam: how a completion request reaches the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_event_stream(&self, url: &str, api_key: &str, body: &Value) -> Result<UpstreamResponse, UpstreamError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        if settings.accept_invalid_certs {
            warn!("⚠️ TLS certificate verification toward {} is disabled (acceptInvalidCerts=true)", settings.base_url);
        }
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_event_stream(&self, url: &str, api_key: &str, body: &Value) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes_stream().map(|chunk| chunk.map_err(UpstreamError::from)).boxed();
        Ok(UpstreamResponse { status, body })
    }
}

/// Streams completion text from an OpenAI-compatible `/chat/completions` endpoint.
pub struct UpstreamStreamClient {
    transport: Arc<dyn Transport>,
    settings: UpstreamSettings,
}

impl UpstreamStreamClient {
    pub fn new(settings: UpstreamSettings, transport: Arc<dyn Transport>) -> Self {
        Self { transport, settings }
    }

    pub fn with_reqwest(settings: UpstreamSettings) -> Result<Self, UpstreamError> {
        let transport = ReqwestTransport::new(&settings)?;
        Ok(Self::new(settings, Arc::new(transport)))
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url)
    }

    pub fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PERSONA},
                {"role": "user", "content": prompt}
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "stream": true
        })
    }

    /// Lazily issues the request on first poll and yields every non-empty
    /// `choices[0].delta.content` in receipt order, ending at `data: [DONE]`
    /// or end of body.
    pub fn stream(&self, prompt: &str) -> impl Stream<Item = Result<String, UpstreamError>> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        let url = self.completions_url();
        let api_key = self.settings.api_key.clone();
        let payload = self.request_body(prompt);
        let model = self.settings.model.clone();
        let max_line = self.settings.max_document_bytes;

        async_stream::try_stream! {
            info!(%url, %model, "🔗 Opening completion stream");
            let response = transport.post_event_stream(&url, &api_key, &payload).await?;
            if !(200..300).contains(&response.status) {
                error!(status = response.status, "❌ Upstream rejected completion request");
                Err::<(), _>(UpstreamError::Status { status: response.status })?;
            }

            let mut body = response.body;
            let mut decoder = LineDecoder::with_limit(max_line);
            let mut finished = false;
            while !finished {
                let Some(chunk) = body.next().await else { break };
                let chunk = chunk?;
                for line in decoder.feed(&chunk) {
                    match parse_event_line(&line) {
                        EventLine::Content(fragment) => {
                            yield fragment;
                        }
                        EventLine::Done => {
                            finished = true;
                            break;
                        }
                        EventLine::Skip => {}
                    }
                }
                if !finished {
                    decoder.check_limit()?;
                }
            }
            if !finished {
                if let Some(line) = decoder.finish() {
                    if let EventLine::Content(fragment) = parse_event_line(&line) {
                        yield fragment;
                    }
                }
            }
        }
    }
}

// --- Event-stream framing ---

/// Splits a byte stream into `\n`-terminated lines. Bytes are buffered
/// until a full line is available so split UTF-8 sequences survive. The
/// pending partial line is bounded by `limit`.
#[derive(Debug)]
struct LineDecoder {
    buf: Vec<u8>,
    scanned: usize,
    limit: usize,
}

impl LineDecoder {
    fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), scanned: 0, limit }
    }

    /// Only bytes added since the last call are scanned; consumed lines are
    /// drained once per chunk.
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        for (offset, byte) in self.buf[self.scanned..].iter().enumerate() {
            if *byte == b'\n' {
                let end = self.scanned + offset;
                lines.push(decode_line(&self.buf[start..end]));
                start = end + 1;
            }
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    fn check_limit(&self) -> Result<(), UpstreamError> {
        if self.buf.len() > self.limit {
            return Err(UpstreamError::Transport(format!(
                "event line exceeded {} bytes without a newline",
                self.limit
            )));
        }
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, PartialEq, Eq)]
enum EventLine {
    Content(String),
    Done,
    Skip,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

fn parse_event_line(line: &str) -> EventLine {
    if line == DONE_LINE {
        return EventLine::Done;
    }
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return EventLine::Skip;
    };
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map_or(EventLine::Skip, EventLine::Content),
        Err(e) => {
            debug!(error = %e, "skipping malformed event line");
            EventLine::Skip
        }
    }
}
