//! Native-messaging frame loop for the reference host.

use crate::codec::{self, MAX_HOST_FRAME, MAX_INBOUND_FRAME};
use crate::host::analyzer::Analyzer;
use crate::models::{AnalyzeRequest, HostMessage, HostRequest};
use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Number of request bytes echoed in a `recv` diagnostic.
const DIAG_PREVIEW_CHARS: usize = 64;

/// Host-side request handler.
pub struct HostServer {
    analyzer: Box<dyn Analyzer>,
    emit_diag: bool,
}

impl HostServer {
    pub fn new(analyzer: Box<dyn Analyzer>, emit_diag: bool) -> Self {
        Self {
            analyzer,
            emit_diag,
        }
    }

    /// Serve frames from `reader` until EOF or a zero-length frame.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Host ready (analyzer: {})", self.analyzer.name());
        self.diag(writer, "host", 0, 0, format!("startup analyzer={}", self.analyzer.name()))
            .await?;

        let mut handled = 0usize;
        while let Some(bytes) = codec::read_frame(reader, MAX_INBOUND_FRAME)
            .await
            .context("Failed to read request frame")?
        {
            handled += 1;
            let raw = String::from_utf8_lossy(&bytes);
            self.diag(writer, "host", bytes.len(), 0, format!("recv: {}", preview(&raw)))
                .await?;

            let reply = self.respond(&bytes, writer).await?;
            let out = encode_reply(&reply)?;
            codec::write_frame(writer, &out, MAX_HOST_FRAME)
                .await
                .context("Failed to write reply frame")?;
        }

        info!("Input closed after {} request(s)", handled);
        Ok(())
    }

    /// Build the reply for one raw request frame.
    async fn respond<W>(&self, bytes: &[u8], writer: &mut W) -> Result<HostMessage>
    where
        W: AsyncWrite + Unpin,
    {
        match parse_request(bytes) {
            Some(HostRequest::Ping) => {
                debug!("Ping received");
                Ok(HostMessage::pong())
            }
            Some(HostRequest::Analyze(request)) => {
                let target_len = request.target_text().len();
                self.diag(writer, self.analyzer.name(), target_len, 0, "invoke-before")
                    .await?;

                let reply = self.analyze(&request).await;
                let note = match reply.error.as_deref() {
                    Some(e) => format!("error: {}", e),
                    None => "ok".to_string(),
                };
                let out_len = serde_json::to_vec(&reply).map(|v| v.len()).unwrap_or(0);
                self.diag(writer, self.analyzer.name(), target_len, out_len, note)
                    .await?;
                Ok(reply)
            }
            None => Ok(HostMessage::failure(None, "unknown type")),
        }
    }

    /// Run the analyzer and wrap its result, echoing the request id.
    pub async fn analyze(&self, request: &AnalyzeRequest) -> HostMessage {
        match self.analyzer.analyze(request).await {
            Ok(list) => HostMessage::suggestions(request.id, list),
            Err(e) => {
                warn!("Analyzer {} failed: {:#}", self.analyzer.name(), e);
                HostMessage::failure(request.id, format!("{:#}", e))
            }
        }
    }

    async fn diag<W>(
        &self,
        writer: &mut W,
        path: &str,
        in_len: usize,
        out_len: usize,
        note: impl Into<String>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.emit_diag {
            return Ok(());
        }
        let message = HostMessage::diag(path, in_len, out_len, note);
        codec::write_message(writer, &message, MAX_HOST_FRAME)
            .await
            .context("Failed to write diagnostic frame")
    }
}

/// Encode a reply, replacing it with an error when it would not fit in one
/// host frame.
fn encode_reply(reply: &HostMessage) -> Result<Vec<u8>> {
    let out = serde_json::to_vec(reply).context("Failed to encode reply")?;
    if out.len() <= MAX_HOST_FRAME {
        return Ok(out);
    }

    warn!(
        "Reply of {} bytes exceeds the {} byte frame limit",
        out.len(),
        MAX_HOST_FRAME
    );
    let failure = HostMessage::failure(reply.id, "response too large");
    serde_json::to_vec(&failure).context("Failed to encode reply")
}

/// Decode a request. Anything that is not a known `type` yields `None`.
fn parse_request(bytes: &[u8]) -> Option<HostRequest> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    match value.get("type").and_then(Value::as_str) {
        Some("ping") => Some(HostRequest::Ping),
        Some("analyze") => match serde_json::from_value::<AnalyzeRequest>(value) {
            Ok(request) => Some(HostRequest::Analyze(request)),
            Err(e) => {
                warn!("Malformed analyze request: {}", e);
                None
            }
        },
        _ => None,
    }
}

fn preview(raw: &str) -> String {
    if raw.chars().count() > DIAG_PREVIEW_CHARS {
        let head: String = raw.chars().take(DIAG_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        raw.to_string()
    }
}
