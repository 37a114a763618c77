//! Pending-call correlation over the tool server's stdout line stream.
//!
//! Every in-flight request owns exactly one slot keyed by its token. A slot
//! is removed exactly once: by a matching response line, or en masse by
//! [`PendingCalls::reject_all`] during stop/crash handling. Responses may
//! arrive in any order; correlation is strictly by token, never by arrival
//! order. Tokens are never reused while their slot is live.

use crate::error::BridgeError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, trace};

type Reply = Result<Value, BridgeError>;

#[derive(Default)]
pub(crate) struct PendingCalls {
    slots: DashMap<u64, oneshot::Sender<Reply>>,
    next_token: AtomicU64,
}

impl PendingCalls {
    /// Allocate a fresh correlation token and register its result slot.
    pub fn register(&self) -> (u64, oneshot::Receiver<Reply>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.slots.insert(token, tx);
        (token, rx)
    }

    /// Drop the slot for a request that was never written to the server.
    pub fn discard(&self, token: u64) {
        self.slots.remove(&token);
    }

    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Feed one raw line from the server's stdout.
    ///
    /// Lines that fail to parse as JSON, or that carry no correlation
    /// token, are silently discarded: stderr is the channel for
    /// non-protocol text, not this one. Lines for unknown or
    /// already-resolved tokens are ignored.
    pub fn dispatch_line(&self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            trace!("discarding non-JSON line from tool server");
            return;
        };
        let Some(token) = token_of(&value) else {
            trace!("discarding line without correlation token");
            return;
        };
        let Some((_, slot)) = self.slots.remove(&token) else {
            debug!(token, "response for unknown or already-resolved token");
            return;
        };
        let reply = match value.get("error") {
            Some(err) => Err(BridgeError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown server error")
                    .to_string(),
            }),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = slot.send(reply);
    }

    /// Reject every in-flight call with an error produced by `reason`.
    /// Used by both stop and crash handling.
    pub fn reject_all(&self, reason: impl Fn() -> BridgeError) {
        let tokens: Vec<u64> = self.slots.iter().map(|entry| *entry.key()).collect();
        for token in tokens {
            if let Some((_, slot)) = self.slots.remove(&token) {
                let _ = slot.send(Err(reason()));
            }
        }
    }
}

fn token_of(value: &Value) -> Option<u64> {
    match value.get("id")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn responses_correlate_by_token_regardless_of_order() {
        let pending = PendingCalls::default();
        let (t1, rx1) = pending.register();
        let (t2, rx2) = pending.register();
        let (t3, rx3) = pending.register();
        assert_eq!(pending.in_flight(), 3);

        // Deliver responses in reverse submission order.
        for token in [t3, t2, t1] {
            pending.dispatch_line(
                &json!({"jsonrpc": "2.0", "id": token, "result": {"token": token}}).to_string(),
            );
        }

        assert_eq!(rx1.await.unwrap().unwrap()["token"], t1);
        assert_eq!(rx2.await.unwrap().unwrap()["token"], t2);
        assert_eq!(rx3.await.unwrap().unwrap()["token"], t3);
        assert_eq!(pending.in_flight(), 0);
    }

    #[tokio::test]
    async fn malformed_lines_are_discarded_without_resolving_anything() {
        let pending = PendingCalls::default();
        let (_token, mut rx) = pending.register();

        pending.dispatch_line("this is not json");
        pending.dispatch_line(r#"{"jsonrpc":"2.0","result":{}}"#);
        pending.dispatch_line(r#"{"jsonrpc":"2.0","id":null,"result":{}}"#);

        assert_eq!(pending.in_flight(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_and_unknown_tokens_are_ignored() {
        let pending = PendingCalls::default();
        let (token, rx) = pending.register();

        let line = json!({"jsonrpc": "2.0", "id": token, "result": "first"}).to_string();
        pending.dispatch_line(&line);
        // Late duplicate for the same token.
        pending.dispatch_line(&json!({"jsonrpc": "2.0", "id": token, "result": "late"}).to_string());
        // Response for a token that was never issued.
        pending.dispatch_line(&json!({"jsonrpc": "2.0", "id": 9999, "result": "ghost"}).to_string());

        assert_eq!(rx.await.unwrap().unwrap(), "first");
    }

    #[tokio::test]
    async fn error_payloads_become_structured_failures() {
        let pending = PendingCalls::default();
        let (token, rx) = pending.register();

        pending.dispatch_line(
            &json!({
                "jsonrpc": "2.0",
                "id": token,
                "error": {"code": -32601, "message": "method not found"}
            })
            .to_string(),
        );

        match rx.await.unwrap() {
            Err(BridgeError::Rpc { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reject_all_fails_every_pending_slot() {
        let pending = PendingCalls::default();
        let (_t1, rx1) = pending.register();
        let (_t2, rx2) = pending.register();

        pending.reject_all(|| BridgeError::Stopped);

        assert!(matches!(rx1.await.unwrap(), Err(BridgeError::Stopped)));
        assert!(matches!(rx2.await.unwrap(), Err(BridgeError::Stopped)));
        assert_eq!(pending.in_flight(), 0);
    }

    #[test]
    fn tokens_are_unique_and_monotonic() {
        let pending = PendingCalls::default();
        let (a, _ra) = pending.register();
        let (b, _rb) = pending.register();
        assert!(b > a);
    }

    #[test]
    fn string_tokens_from_the_server_are_accepted() {
        assert_eq!(token_of(&json!({"id": "42"})), Some(42));
        assert_eq!(token_of(&json!({"id": 42})), Some(42));
        assert_eq!(token_of(&json!({"id": [1]})), None);
        assert_eq!(token_of(&json!({})), None);
    }
}
