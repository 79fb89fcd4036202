//! Wire models shared by the broker, the UI router and the reference host.
//!
//! Host traffic uses the native-messaging JSON shapes; UI traffic uses the
//! message shapes the compose script understands.

use crate::history::RollbackEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Broker-generated identifier of one analysis request.
pub type RequestId = u64;

/// Flag value that marks text as needing revision.
pub const IMPOLITE_FLAG: &str = "impolite";

/// Identifies the UI context (tab + frame) waiting for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyTarget {
    /// Browser tab id. Contexts without a tab cannot receive deliveries.
    #[serde(default)]
    pub tab_id: Option<i64>,
    /// Frame inside the tab (0 is the top frame).
    #[serde(default)]
    pub frame_id: i64,
}

impl ReplyTarget {
    pub fn new(tab_id: i64, frame_id: i64) -> Self {
        Self {
            tab_id: Some(tab_id),
            frame_id,
        }
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tab_id {
            Some(tab) => write!(f, "tab {}/frame {}", tab, self.frame_id),
            None => write!(f, "no-tab/frame {}", self.frame_id),
        }
    }
}

/// Tone category derived from the host's flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    /// Good tone, no revision needed.
    Polite,
    /// Revision recommended.
    Impolite,
}

impl Tone {
    /// Classify a host flag. Only a case-insensitive `"impolite"` counts as
    /// needing revision; every other value is treated as polite.
    pub fn from_flag(flag: &str) -> Self {
        if flag.eq_ignore_ascii_case(IMPOLITE_FLAG) {
            Tone::Impolite
        } else {
            Tone::Polite
        }
    }

    /// Human-readable label shown next to the tone badge.
    pub fn label(&self) -> &'static str {
        match self {
            Tone::Polite => "Good tone",
            Tone::Impolite => "Revision recommended",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Polite => write!(f, "polite"),
            Tone::Impolite => write!(f, "impolite"),
        }
    }
}

/// Body of an `analyze` request sent to the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// Echo key for correlating replies. Browsers talking to the host
    /// directly do not send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Sentence under analysis.
    #[serde(default)]
    pub focus: String,
    /// Text preceding the focus sentence.
    #[serde(default)]
    pub context: String,
    /// Full compose body.
    #[serde(default)]
    pub body: String,
    /// Milliseconds since the Unix epoch at request creation.
    #[serde(default)]
    pub ts: i64,
}

impl AnalyzeRequest {
    /// Text the analyzer should look at: the focus sentence, or the body when
    /// no focus was given.
    pub fn target_text(&self) -> &str {
        let focus = self.focus.trim();
        if focus.is_empty() {
            self.body.trim()
        } else {
            focus
        }
    }
}

/// Messages sent to the host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostRequest {
    Analyze(AnalyzeRequest),
    Ping,
}

/// Raw message received from the host process.
///
/// The host protocol is loosely typed: tags live in different fields
/// depending on the message, so everything is optional and
/// [`HostMessage::classify`] decides what the message means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    // Diagnostic fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_len: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_len: Option<u64>,
}

/// Meaning of a host message once classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Log-only diagnostics.
    Diag {
        path: String,
        note: String,
        in_len: u64,
        out_len: u64,
    },
    /// Analysis result for the in-flight request.
    Analysis {
        id: Option<RequestId>,
        tone: Tone,
        suggestions: Vec<String>,
    },
    /// Heartbeat reply.
    Pong,
    /// Host-reported failure for the in-flight request.
    Failure { id: Option<RequestId>, error: String },
    /// Anything else; logged and dropped.
    Unrecognized,
}

impl HostMessage {
    pub fn diag(path: &str, in_len: usize, out_len: usize, note: impl Into<String>) -> Self {
        Self {
            kind: Some("diag".to_string()),
            path: Some(path.to_string()),
            note: Some(note.into()),
            in_len: Some(in_len as u64),
            out_len: Some(out_len as u64),
            ..Default::default()
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: Some("pong".to_string()),
            ..Default::default()
        }
    }

    pub fn suggestions(id: Option<RequestId>, list: Vec<String>) -> Self {
        Self {
            suggestions: Some(list.into_iter().map(Value::String).collect()),
            id,
            ..Default::default()
        }
    }

    pub fn failure(id: Option<RequestId>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            id,
            ..Default::default()
        }
    }

    /// Classify the message. Checks run in a fixed order: diagnostics first,
    /// then a non-empty suggestion list, then heartbeat replies, then errors.
    pub fn classify(self) -> HostEvent {
        if self.kind.as_deref() == Some("diag") {
            return HostEvent::Diag {
                path: self.path.unwrap_or_default(),
                note: self.note.unwrap_or_default(),
                in_len: self.in_len.unwrap_or(0),
                out_len: self.out_len.unwrap_or(0),
            };
        }

        if let Some(list) = self.suggestions.filter(|l| !l.is_empty()) {
            let mut items = list.into_iter().map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            });
            let flag = items.next().unwrap_or_default();
            return HostEvent::Analysis {
                id: self.id,
                tone: Tone::from_flag(&flag),
                suggestions: items.collect(),
            };
        }

        if self.kind.as_deref() == Some("pong") {
            return HostEvent::Pong;
        }

        match self.error {
            Some(error) if !error.is_empty() => HostEvent::Failure { id: self.id, error },
            _ => HostEvent::Unrecognized,
        }
    }
}

/// Messages delivered to a UI context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    AnalysisResult {
        tone: Tone,
        #[serde(rename = "toneText")]
        tone_text: String,
        suggestions: Vec<String>,
    },
    Error {
        error: String,
    },
}

impl UiMessage {
    pub fn analysis(tone: Tone, suggestions: Vec<String>) -> Self {
        UiMessage::AnalysisResult {
            tone,
            tone_text: tone.label().to_string(),
            suggestions,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        UiMessage::Error {
            error: error.into(),
        }
    }
}

/// Requests a UI context can send to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiRequest {
    Ping,
    SuggestionApplied {
        #[serde(default)]
        original: String,
        #[serde(default)]
        applied: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(alias = "emailContent")]
    Analyze {
        #[serde(default)]
        focus: Option<String>,
        #[serde(default)]
        context: Option<String>,
        #[serde(default)]
        body: Option<String>,
    },
    RollbackList,
    Rollback {
        #[serde(default)]
        entry_id: Option<u64>,
    },
    #[serde(other)]
    Unknown,
}

impl UiRequest {
    /// Parse a request, mapping anything malformed to [`UiRequest::Unknown`].
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or(UiRequest::Unknown)
    }
}

/// Immediate acknowledgement returned for every UI request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UiAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<RollbackEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<RollbackEntry>,
}

impl UiAck {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// One line read from the UI channel.
#[derive(Debug, Clone, Deserialize)]
pub struct UiEnvelope {
    pub sender: ReplyTarget,
    /// Caller-chosen sequence number, echoed on the acknowledgement.
    #[serde(default)]
    pub seq: Option<u64>,
    pub message: Value,
}

/// One line written to the UI channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiOutbound {
    Response {
        target: ReplyTarget,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        response: UiAck,
    },
    Deliver {
        target: ReplyTarget,
        message: UiMessage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> HostEvent {
        serde_json::from_value::<HostMessage>(value)
            .unwrap()
            .classify()
    }

    #[test]
    fn test_tone_flag_matching() {
        assert_eq!(Tone::from_flag("impolite"), Tone::Impolite);
        assert_eq!(Tone::from_flag("IMPOLITE"), Tone::Impolite);
        assert_eq!(Tone::from_flag("Impolite"), Tone::Impolite);
        assert_eq!(Tone::from_flag("polite"), Tone::Polite);
        assert_eq!(Tone::from_flag("Rude"), Tone::Polite);
        assert_eq!(Tone::from_flag(" impolite"), Tone::Polite);
        assert_eq!(Tone::from_flag(""), Tone::Polite);
    }

    #[test]
    fn test_classify_impolite_result() {
        let event = parse(json!({"suggestions": ["IMPOLITE", "a", "b"]}));
        assert_eq!(
            event,
            HostEvent::Analysis {
                id: None,
                tone: Tone::Impolite,
                suggestions: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn test_classify_polite_result() {
        let event = parse(json!({"suggestions": ["polite", "x"], "id": 4}));
        assert_eq!(
            event,
            HostEvent::Analysis {
                id: Some(4),
                tone: Tone::Polite,
                suggestions: vec!["x".to_string()],
            }
        );
    }

    #[test]
    fn test_classify_order() {
        assert!(matches!(
            parse(json!({"type": "diag", "path": "host", "note": "recv", "suggestions": ["impolite"]})),
            HostEvent::Diag { .. }
        ));
        assert_eq!(parse(json!({"type": "pong"})), HostEvent::Pong);
        assert_eq!(
            parse(json!({"error": "unknown type"})),
            HostEvent::Failure {
                id: None,
                error: "unknown type".to_string()
            }
        );
        // An empty list is not a result.
        assert_eq!(parse(json!({"suggestions": []})), HostEvent::Unrecognized);
        assert_eq!(parse(json!({"error": ""})), HostEvent::Unrecognized);
        assert_eq!(parse(json!({"hello": 1})), HostEvent::Unrecognized);
    }

    #[test]
    fn test_non_string_suggestions_are_stringified() {
        let event = parse(json!({"suggestions": ["polite", 42]}));
        match event {
            HostEvent::Analysis { suggestions, .. } => assert_eq!(suggestions, vec!["42"]),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_host_request_wire_shape() {
        let request = HostRequest::Analyze(AnalyzeRequest {
            id: Some(3),
            focus: "Send it now.".to_string(),
            context: "Hi.".to_string(),
            body: "Hi. Send it now.".to_string(),
            ts: 1_700_000_000_000,
        });
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "analyze");
        assert_eq!(value["focus"], "Send it now.");
        assert_eq!(value["id"], 3);

        let ping = serde_json::to_value(&HostRequest::Ping).unwrap();
        assert_eq!(ping, json!({"type": "ping"}));
    }

    #[test]
    fn test_ui_message_wire_shape() {
        let value = serde_json::to_value(UiMessage::analysis(
            Tone::Impolite,
            vec!["Could you send it?".to_string()],
        ))
        .unwrap();
        assert_eq!(value["type"], "analysis_result");
        assert_eq!(value["tone"], "impolite");
        assert_eq!(value["toneText"], "Revision recommended");

        let value = serde_json::to_value(UiMessage::error("boom")).unwrap();
        assert_eq!(value, json!({"type": "error", "error": "boom"}));
    }

    #[test]
    fn test_ui_request_parsing() {
        assert_eq!(
            UiRequest::from_value(json!({"type": "emailContent", "body": "Hello."})),
            UiRequest::Analyze {
                focus: None,
                context: None,
                body: Some("Hello.".to_string())
            }
        );
        assert_eq!(
            UiRequest::from_value(json!({"type": "rollback"})),
            UiRequest::Rollback { entry_id: None }
        );
        assert_eq!(
            UiRequest::from_value(json!({"type": "launch_rockets"})),
            UiRequest::Unknown
        );
        assert_eq!(UiRequest::from_value(json!("ping")), UiRequest::Unknown);
    }

    #[test]
    fn test_target_text_falls_back_to_body() {
        let request = AnalyzeRequest {
            focus: "   ".to_string(),
            body: " Whole body. ".to_string(),
            ..Default::default()
        };
        assert_eq!(request.target_text(), "Whole body.");
    }
}
