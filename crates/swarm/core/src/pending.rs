//! Outstanding requests keyed by request id.

use std::collections::HashMap;

use bytes::Bytes;
use libp2p::PeerId;
use strand_net_transport::ConnectionId;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::SwarmError;

/// Completion channel of a request.
pub type Callback = oneshot::Sender<Result<Bytes, SwarmError>>;

/// Where a pending request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Waiting for a session with the peer.
    Queued,
    /// Written to this connection, waiting for the response.
    InFlight(ConnectionId),
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) peer_id: PeerId,
    pub(crate) protocol: String,
    pub(crate) payload: Bytes,
    pub(crate) deadline: Instant,
    pub(crate) delivery: Delivery,
    /// Re-sends performed after the carrying connection was lost.
    pub(crate) retries: u32,
    seq: u64,
    callback: Option<Callback>,
}

impl PendingRequest {
    pub(crate) fn new(
        peer_id: PeerId,
        protocol: String,
        payload: Bytes,
        deadline: Instant,
        callback: Option<Callback>,
    ) -> Self {
        Self {
            peer_id,
            protocol,
            payload,
            deadline,
            delivery: Delivery::Queued,
            retries: 0,
            seq: 0,
            callback,
        }
    }

    pub(crate) fn resolve(mut self, result: Result<Bytes, SwarmError>) {
        if let Some(callback) = self.callback.take() {
            // The caller may have stopped waiting.
            let _ = callback.send(result);
        }
    }
}

/// The pending request table.
///
/// Every entry is retired exactly once: by its response, its deadline, a
/// send failure, a disconnect or shutdown. Retiring removes the entry and
/// fires its callback.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<String, PendingRequest>,
    next_seq: u64,
}

impl PendingRequests {
    /// Inserts a request unless the id is already taken, in which case the
    /// rejected request is handed back and the existing entry is untouched.
    pub(crate) fn insert(
        &mut self,
        request_id: String,
        mut request: PendingRequest,
    ) -> Result<(), PendingRequest> {
        if self.entries.contains_key(&request_id) {
            return Err(request);
        }
        request.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(request_id, request);
        Ok(())
    }

    pub(crate) fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub(crate) fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.entries.get(request_id)
    }

    pub(crate) fn get_mut(&mut self, request_id: &str) -> Option<&mut PendingRequest> {
        self.entries.get_mut(request_id)
    }

    pub(crate) fn mark_in_flight(&mut self, request_id: &str, connection: ConnectionId) {
        if let Some(request) = self.entries.get_mut(request_id) {
            request.delivery = Delivery::InFlight(connection);
        }
    }

    /// Removes the entry and fires its callback. Returns false if the id
    /// was not pending.
    pub(crate) fn retire(&mut self, request_id: &str, result: Result<Bytes, SwarmError>) -> bool {
        match self.entries.remove(request_id) {
            Some(request) => {
                request.resolve(result);
                true
            }
            None => false,
        }
    }

    /// Ids whose deadline is at or before `now`.
    pub(crate) fn expired(&self, now: Instant) -> Vec<String> {
        self.select(|r| r.deadline <= now)
    }

    pub(crate) fn in_flight_on(&self, connection: ConnectionId) -> Vec<String> {
        self.select(|r| r.delivery == Delivery::InFlight(connection))
    }

    /// Queued requests for `peer_id`, oldest first.
    pub(crate) fn queued_for(&self, peer_id: &PeerId) -> Vec<String> {
        let mut queued: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, r)| r.peer_id == *peer_id && r.delivery == Delivery::Queued)
            .map(|(id, r)| (r.seq, id.clone()))
            .collect();
        queued.sort_unstable();
        queued.into_iter().map(|(_, id)| id).collect()
    }

    pub(crate) fn for_peer(&self, peer_id: &PeerId) -> Vec<String> {
        self.select(|r| r.peer_id == *peer_id)
    }

    /// Retires every entry with `error`.
    pub(crate) fn drain(&mut self, error: SwarmError) {
        for (_, request) in self.entries.drain() {
            request.resolve(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn select(&self, predicate: impl Fn(&PendingRequest) -> bool) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, r)| predicate(r))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn pending(peer_id: PeerId) -> (PendingRequest, oneshot::Receiver<Result<Bytes, SwarmError>>) {
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest::new(
            peer_id,
            "/test/1".to_owned(),
            Bytes::from_static(b"ping"),
            Instant::now() + Duration::from_secs(5),
            Some(tx),
        );
        (request, rx)
    }

    #[test]
    fn test_duplicate_id_leaves_original_untouched() {
        let mut table = PendingRequests::default();
        let peer = PeerId::random();
        let (first, mut first_rx) = pending(peer);
        let (second, _second_rx) = pending(PeerId::random());

        table.insert("r1".to_owned(), first).unwrap();
        let rejected = table.insert("r1".to_owned(), second).unwrap_err();
        assert_ne!(rejected.peer_id, peer);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("r1").map(|r| r.peer_id), Some(peer));
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn test_retire_fires_once() {
        let mut table = PendingRequests::default();
        let (request, mut rx) = pending(PeerId::random());
        table.insert("r1".to_owned(), request).unwrap();

        assert!(table.retire("r1", Ok(Bytes::from_static(b"pong"))));
        assert!(!table.retire("r1", Err(SwarmError::Timeout)));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Bytes::from_static(b"pong"));
        assert!(!table.contains("r1"));
    }

    #[test]
    fn test_retire_tolerates_dropped_receiver() {
        let mut table = PendingRequests::default();
        let (request, rx) = pending(PeerId::random());
        drop(rx);
        table.insert("r1".to_owned(), request).unwrap();
        assert!(table.retire("r1", Err(SwarmError::Timeout)));
    }

    #[test]
    fn test_selectors() {
        let mut table = PendingRequests::default();
        let peer = PeerId::random();
        let conn = ConnectionId::new(9);
        for id in ["a", "b", "d"] {
            table.insert(id.to_owned(), pending(peer).0).unwrap();
        }
        table.insert("c".to_owned(), pending(PeerId::random()).0).unwrap();
        table.mark_in_flight("a", conn);

        assert_eq!(table.in_flight_on(conn), vec!["a".to_owned()]);
        assert_eq!(table.queued_for(&peer), vec!["b".to_owned(), "d".to_owned()]);
        let mut mine = table.for_peer(&peer);
        mine.sort();
        assert_eq!(mine, vec!["a".to_owned(), "b".to_owned(), "d".to_owned()]);
    }

    #[test]
    fn test_expired_and_drain() {
        let mut table = PendingRequests::default();
        let (request, mut rx) = pending(PeerId::random());
        let deadline = request.deadline;
        table.insert("r1".to_owned(), request).unwrap();

        assert!(table.expired(deadline - Duration::from_millis(1)).is_empty());
        assert_eq!(table.expired(deadline), vec!["r1".to_owned()]);

        table.drain(SwarmError::Shutdown);
        assert_eq!(table.len(), 0);
        assert_matches!(rx.try_recv(), Ok(Err(SwarmError::Shutdown)));
    }
}
