//! Request/response correlation.
//!
//! Every outbound request gets an id from a counter that starts at 1 and only
//! grows for the lifetime of the [`Correlator`], so an id is never reused even
//! across reconnects. Replies are paired with their request by id, in whatever
//! order the transport delivers them.

use std::collections::HashMap;

use scenerelay_shared::{RemoteError, RpcRequest};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RpcError;

pub type Reply = Result<Value, RpcError>;

struct PendingRequest {
    request: RpcRequest,
    responder: oneshot::Sender<Reply>,
}

/// A registered request, ready to be written to the socket.
pub struct Outbound {
    pub id: u64,
    pub frame: String,
    pub reply: oneshot::Receiver<Reply>,
}

pub struct Correlator {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Build the request envelope, record it as pending and serialize it.
    ///
    /// Fails without consuming an id when the resource or method is empty.
    pub fn register(
        &mut self,
        resource: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Outbound, RpcError> {
        if resource.trim().is_empty() {
            return Err(RpcError::InvalidRequest("missing resource".to_string()));
        }
        if method.trim().is_empty() {
            return Err(RpcError::InvalidRequest("missing method".to_string()));
        }

        let request = RpcRequest::new(self.next_id, resource, method, args);
        let frame = serde_json::to_string(&request)
            .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;

        let id = request.id;
        self.next_id += 1;

        let (responder, reply) = oneshot::channel();
        self.pending.insert(id, PendingRequest { request, responder });

        Ok(Outbound { id, frame, reply })
    }

    /// Deliver a reply. Returns false when no request with that id is pending,
    /// e.g. a duplicate or a reply that arrived after its request timed out.
    pub fn complete(&mut self, id: u64, outcome: Result<Value, RemoteError>) -> bool {
        let Some(pending) = self.pending.remove(&id) else {
            return false;
        };
        if pending.responder.send(outcome.map_err(RpcError::Remote)).is_err() {
            tracing::debug!(
                id,
                method = %pending.request.method,
                "caller stopped waiting before the reply arrived"
            );
        }
        true
    }

    /// Drop a pending request without answering it.
    pub fn forget(&mut self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Reject every pending request with [`RpcError::ConnectionClosed`].
    /// Returns how many were rejected.
    pub fn fail_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.responder.send(Err(RpcError::ConnectionClosed));
        }
        count
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut correlator = Correlator::new();
        let first = correlator.register("ScenesService", "getScenes", vec![]).unwrap();
        let second = correlator.register("ScenesService", "activeSceneId", vec![]).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let sent: RpcRequest = serde_json::from_str(&second.frame).unwrap();
        assert_eq!(sent.id, 2);
        assert_eq!(sent.method, "activeSceneId");
        assert_eq!(sent.params.resource, "ScenesService");
    }

    #[test]
    fn replies_resolve_by_id_regardless_of_order() {
        let mut correlator = Correlator::new();
        let mut a = correlator.register("R", "a", vec![]).unwrap();
        let mut b = correlator.register("R", "b", vec![]).unwrap();
        let mut c = correlator.register("R", "c", vec![]).unwrap();

        assert!(correlator.complete(c.id, Ok(json!("c"))));
        assert!(correlator.complete(a.id, Ok(json!("a"))));
        assert!(correlator.complete(b.id, Err(RemoteError::new(-1, "b failed"))));

        assert_eq!(a.reply.try_recv().unwrap(), Ok(json!("a")));
        assert_eq!(
            b.reply.try_recv().unwrap(),
            Err(RpcError::Remote(RemoteError::new(-1, "b failed")))
        );
        assert_eq!(c.reply.try_recv().unwrap(), Ok(json!("c")));
        assert!(correlator.is_empty());
    }

    #[test]
    fn unknown_and_duplicate_replies_are_ignored() {
        let mut correlator = Correlator::new();
        let out = correlator.register("R", "m", vec![]).unwrap();

        assert!(!correlator.complete(999, Ok(json!(true))));
        assert!(correlator.is_pending(out.id));

        assert!(correlator.complete(out.id, Ok(json!(true))));
        assert!(!correlator.complete(out.id, Ok(json!(false))));
    }

    #[test]
    fn invalid_requests_fail_fast_without_consuming_ids() {
        let mut correlator = Correlator::new();
        assert!(matches!(
            correlator.register("", "getScenes", vec![]),
            Err(RpcError::InvalidRequest(_))
        ));
        assert!(matches!(
            correlator.register("ScenesService", " ", vec![]),
            Err(RpcError::InvalidRequest(_))
        ));
        assert!(correlator.is_empty());

        let out = correlator.register("ScenesService", "getScenes", vec![]).unwrap();
        assert_eq!(out.id, 1);
    }

    #[test]
    fn fail_all_rejects_each_request_once_and_keeps_counting() {
        let mut correlator = Correlator::new();
        let mut a = correlator.register("R", "a", vec![]).unwrap();
        let mut b = correlator.register("R", "b", vec![]).unwrap();

        assert_eq!(correlator.fail_all(), 2);
        assert_eq!(a.reply.try_recv().unwrap(), Err(RpcError::ConnectionClosed));
        assert_eq!(b.reply.try_recv().unwrap(), Err(RpcError::ConnectionClosed));
        assert_eq!(correlator.fail_all(), 0);

        let next = correlator.register("R", "c", vec![]).unwrap();
        assert_eq!(next.id, 3);
        assert!(!correlator.complete(a.id, Ok(json!(null))));
    }

    #[test]
    fn forgotten_requests_ignore_late_replies() {
        let mut correlator = Correlator::new();
        let out = correlator.register("R", "slow", vec![]).unwrap();
        assert!(correlator.forget(out.id));
        assert!(!correlator.complete(out.id, Ok(json!(1))));
        assert_eq!(correlator.len(), 0);
    }
}
