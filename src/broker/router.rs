//! Handling of requests coming from UI contexts.
//!
//! Every request gets an immediate acknowledgement. Analysis requests are
//! handed to the broker, whose eventual reply is delivered separately.

use crate::broker::engine::Broker;
use crate::history::HistoryBook;
use crate::models::{AnalyzeRequest, ReplyTarget, UiAck, UiRequest};
use tracing::{debug, info};

/// Dispatches UI requests to the broker and the rollback history.
pub struct UiRouter {
    history: HistoryBook,
}

impl UiRouter {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: HistoryBook::new(history_capacity),
        }
    }

    /// Handle one request from `sender`.
    pub fn handle(&mut self, broker: &mut Broker, sender: ReplyTarget, request: UiRequest) -> UiAck {
        match request {
            UiRequest::Ping => UiAck {
                ts: Some(broker.now_millis()),
                ..UiAck::ok()
            },

            UiRequest::SuggestionApplied {
                original,
                applied,
                timestamp,
            } => {
                let timestamp = timestamp.unwrap_or_else(|| broker.now_millis());
                let id = self.history.record(sender, original, applied, timestamp);
                info!("Suggestion applied in {} (history entry {})", sender, id);
                UiAck::ok()
            }

            UiRequest::Analyze {
                focus,
                context,
                body,
            } => {
                let body = body.unwrap_or_default();
                let focus = focus
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| body.clone());
                let payload = AnalyzeRequest {
                    id: None,
                    focus,
                    context: context.unwrap_or_default(),
                    body,
                    ts: broker.now_millis(),
                };

                let id = broker.enqueue(payload, sender);
                debug!("Analysis request {} accepted from {}", id, sender);
                UiAck {
                    status: Some("queued".to_string()),
                    ..UiAck::ok()
                }
            }

            UiRequest::RollbackList => UiAck {
                history: Some(self.history.list(&sender)),
                ..UiAck::ok()
            },

            UiRequest::Rollback { entry_id } => match self.history.rollback(&sender, entry_id) {
                Some(entry) => {
                    info!("Rolled back entry {} in {}", entry.id, sender);
                    UiAck {
                        entry: Some(entry),
                        ..UiAck::ok()
                    }
                }
                None => UiAck::failed("nothing to roll back"),
            },

            UiRequest::Unknown => UiAck::failed("unknown message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::Harness;
    use crate::history::DEFAULT_HISTORY_CAPACITY;
    use crate::models::HostRequest;
    use serde_json::json;

    fn request(value: serde_json::Value) -> UiRequest {
        UiRequest::from_value(value)
    }

    #[test]
    fn test_ping_returns_timestamp() {
        let mut h = Harness::new();
        let mut router = UiRouter::new(DEFAULT_HISTORY_CAPACITY);
        let ack = router.handle(&mut h.broker, ReplyTarget::new(1, 0), request(json!({"type": "ping"})));
        assert!(ack.ok);
        assert_eq!(ack.ts, Some(1_700_000_000_000));
    }

    #[test]
    fn test_analyze_is_queued_with_focus_fallback() {
        let mut h = Harness::new();
        let mut router = UiRouter::new(DEFAULT_HISTORY_CAPACITY);
        let ack = router.handle(
            &mut h.broker,
            ReplyTarget::new(4, 2),
            request(json!({"type": "emailContent", "focus": "", "body": "Send the report."})),
        );
        assert!(ack.ok);
        assert_eq!(ack.status.as_deref(), Some("queued"));

        let sent = h.host.borrow().sent.clone();
        match &sent[0].1 {
            HostRequest::Analyze(a) => {
                assert_eq!(a.focus, "Send the report.");
                assert_eq!(a.body, "Send the report.");
                assert_eq!(a.context, "");
                assert_eq!(a.ts, 1_700_000_000_000);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_applied_suggestions_can_be_rolled_back() {
        let mut h = Harness::new();
        let mut router = UiRouter::new(DEFAULT_HISTORY_CAPACITY);
        let tab = ReplyTarget::new(1, 0);

        for (original, applied) in [("do it", "Could you do it?"), ("now", "When you can")] {
            let ack = router.handle(
                &mut h.broker,
                tab,
                request(json!({"type": "suggestion_applied", "original": original, "applied": applied})),
            );
            assert!(ack.ok);
        }

        let list = router.handle(&mut h.broker, tab, request(json!({"type": "rollback_list"})));
        let history = list.history.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].modified, "Could you do it?");

        let first_id = history[0].id;
        let ack = router.handle(
            &mut h.broker,
            tab,
            request(json!({"type": "rollback", "entry_id": first_id})),
        );
        assert_eq!(ack.entry.map(|e| e.original), Some("do it".to_string()));

        let ack = router.handle(&mut h.broker, tab, request(json!({"type": "rollback"})));
        assert_eq!(ack.entry.map(|e| e.original), Some("now".to_string()));

        let ack = router.handle(&mut h.broker, tab, request(json!({"type": "rollback"})));
        assert!(!ack.ok);
    }

    #[test]
    fn test_history_is_scoped_to_sender() {
        let mut h = Harness::new();
        let mut router = UiRouter::new(DEFAULT_HISTORY_CAPACITY);
        router.handle(
            &mut h.broker,
            ReplyTarget::new(1, 0),
            request(json!({"type": "suggestion_applied", "original": "a", "applied": "b"})),
        );
        let list = router.handle(
            &mut h.broker,
            ReplyTarget::new(2, 0),
            request(json!({"type": "rollback_list"})),
        );
        assert_eq!(list.history, Some(vec![]));
    }

    #[test]
    fn test_unknown_message() {
        let mut h = Harness::new();
        let mut router = UiRouter::new(DEFAULT_HISTORY_CAPACITY);
        let ack = router.handle(&mut h.broker, ReplyTarget::new(1, 0), request(json!({"type": "reboot"})));
        assert!(!ack.ok);
        assert_eq!(ack.error.as_deref(), Some("unknown message"));
    }
}
