/// Best-effort fan-out of change events to connected collaborators
use dashmap::DashMap;
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, trace, warn};

use crate::{ChangeEvent, Scope};

/// Events buffered per topic before slow subscribers start missing them
pub const DEFAULT_TOPIC_CAPACITY: usize = 1000;

/// Upper bound on per-topic buffering; each topic allocates its buffer up front
pub const MAX_TOPIC_CAPACITY: usize = 1 << 16;

/// Per-scope publish/subscribe hub.
///
/// Each scope owns one broadcast channel. Events published through one call
/// site reach every current subscriber of the scope in publish order. Nothing
/// is persisted or replayed: late subscribers only see later events.
///
/// A topic lives while it has subscribers; the last [`Subscription`] to drop
/// removes it.
pub struct ChangeBroadcaster {
    topics: Arc<DashMap<Scope, Topic>>,
    next_topic: AtomicU64,
    capacity: usize,
}

struct Topic {
    /// Distinguishes a topic from one recreated under the same scope
    id: u64,
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            next_topic: AtomicU64::new(0),
            capacity: capacity.clamp(1, MAX_TOPIC_CAPACITY),
        }
    }

    /// Start receiving events published on `scope` from now on
    pub fn subscribe(&self, scope: Scope) -> Subscription {
        let (topic_id, rx) = {
            let topic = self.topics.entry(scope).or_insert_with(|| Topic {
                id: self.next_topic.fetch_add(1, Ordering::Relaxed),
                tx: broadcast::channel(self.capacity).0,
            });
            (topic.id, topic.tx.subscribe())
        };
        debug!("New subscriber on {}", scope);
        Subscription {
            scope,
            topic_id,
            rx,
            topics: self.topics.clone(),
        }
    }

    /// Publish to one scope, returning how many subscribers were reached.
    ///
    /// Publishing never fails: a scope without subscribers is a no-op.
    pub fn publish(&self, scope: Scope, event: ChangeEvent) -> usize {
        let Some(tx) = self.topics.get(&scope).map(|t| t.tx.clone()) else {
            trace!("No subscribers on {}, dropping {:?} event", scope, event.kind);
            return 0;
        };

        match tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                // every subscriber went away since the topic was created
                self.topics
                    .remove_if(&scope, |_, topic| topic.tx.receiver_count() == 0);
                0
            }
        }
    }

    /// Publish to every scope the event belongs to
    pub fn publish_event(&self, event: &ChangeEvent) -> usize {
        event
            .scopes()
            .into_iter()
            .map(|scope| self.publish(scope, event.clone()))
            .sum()
    }

    /// Drop a topic; its subscribers drain buffered events and then end
    pub fn close(&self, scope: Scope) {
        if self.topics.remove(&scope).is_some() {
            debug!("Closed topic {}", scope);
        }
    }

    pub fn subscriber_count(&self, scope: Scope) -> usize {
        self.topics
            .get(&scope)
            .map(|t| t.tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

/// Receiving end for one scope
pub struct Subscription {
    scope: Scope,
    topic_id: u64,
    rx: broadcast::Receiver<ChangeEvent>,
    topics: Arc<DashMap<Scope, Topic>>,
}

impl Subscription {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Next event, or `None` once the topic is closed.
    ///
    /// A subscriber that falls more than the topic capacity behind skips the
    /// events it missed and carries on.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Subscriber on {} lagged, skipped {} events", self.scope, missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Subscriber on {} lagged, skipped {} events", self.scope, missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // `self.rx` is still alive here, so the last subscriber sees a count of 1
        let removed = self.topics.remove_if(&self.scope, |_, topic| {
            topic.id == self.topic_id && topic.tx.receiver_count() <= 1
        });
        if removed.is_some() {
            trace!("Last subscriber left {}, topic removed", self.scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProjectId, TrackId, UserId};
    use futures::StreamExt;

    fn event(n: i64) -> ChangeEvent {
        ChangeEvent::track_deleted(ProjectId(1), TrackId(n), UserId(1))
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = ChangeBroadcaster::default();

        assert_eq!(hub.publish(Scope::Project(ProjectId(1)), event(1)), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Project(ProjectId(1));

        let mut alice = hub.subscribe(scope);
        let mut bob = hub.subscribe(scope);

        for n in 1..=3 {
            assert_eq!(hub.publish(scope, event(n)), 2);
        }

        for sub in [&mut alice, &mut bob] {
            let ids: Vec<i64> = vec![
                sub.recv().await.unwrap().entity_id,
                sub.recv().await.unwrap().entity_id,
                sub.recv().await.unwrap().entity_id,
            ];
            assert_eq!(ids, vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_others() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Track(TrackId(4));

        let gone = hub.subscribe(scope);
        let mut alive = hub.subscribe(scope);
        drop(gone);

        assert_eq!(hub.publish(scope, event(4)), 1);
        assert_eq!(alive.recv().await.unwrap().entity_id, 4);
    }

    #[test]
    fn test_last_subscriber_removes_topic() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Project(ProjectId(2));

        let first = hub.subscribe(scope);
        let second = hub.subscribe(scope);
        assert_eq!(hub.subscriber_count(scope), 2);

        drop(first);
        assert_eq!(hub.topic_count(), 1);
        assert_eq!(hub.subscriber_count(scope), 1);

        drop(second);
        assert_eq!(hub.topic_count(), 0);
        assert_eq!(hub.publish(scope, event(1)), 0);
    }

    #[test]
    fn test_quiet_topics_do_not_accumulate() {
        let hub = ChangeBroadcaster::default();

        for n in 0..1000 {
            drop(hub.subscribe(Scope::Track(TrackId(n))));
        }
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_subscription_leaves_reopened_topic_alone() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Project(ProjectId(3));

        let old = hub.subscribe(scope);
        hub.close(scope);
        let mut current = hub.subscribe(scope);

        // the old receiver belongs to the closed topic
        drop(old);
        assert_eq!(hub.topic_count(), 1);

        assert_eq!(hub.publish(scope, event(9)), 1);
        assert_eq!(current.recv().await.unwrap().entity_id, 9);
    }

    #[tokio::test]
    async fn test_stream_drop_removes_topic() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Track(TrackId(6));

        let mut stream = Box::pin(hub.subscribe(scope).into_stream());
        hub.publish(scope, event(6));
        assert_eq!(stream.next().await.unwrap().entity_id, 6);

        drop(stream);
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn test_late_subscriber_sees_no_replay() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Project(ProjectId(1));

        let _early = hub.subscribe(scope);
        hub.publish(scope, event(1));

        let mut late = hub.subscribe(scope);
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_lagging_subscriber_skips_ahead() {
        let hub = ChangeBroadcaster::new(2);
        let scope = Scope::Project(ProjectId(1));
        let mut slow = hub.subscribe(scope);

        for n in 1..=5 {
            hub.publish(scope, event(n));
        }

        // the oldest events were overwritten; the newest two survive
        assert_eq!(slow.try_recv().unwrap().entity_id, 4);
        assert_eq!(slow.try_recv().unwrap().entity_id, 5);
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let hub = ChangeBroadcaster::default();
        let scope = Scope::Project(ProjectId(7));
        let stream = hub.subscribe(scope).into_stream();

        hub.publish(scope, event(1));
        hub.close(scope);

        let received: Vec<ChangeEvent> = stream.collect().await;
        assert_eq!(received.len(), 1);
    }

    #[test]
    fn test_capacity_is_clamped() {
        let hub = ChangeBroadcaster::new(usize::MAX);
        let scope = Scope::Project(ProjectId(1));
        let mut sub = hub.subscribe(scope);

        assert_eq!(hub.publish(scope, event(1)), 1);
        assert_eq!(sub.try_recv().unwrap().entity_id, 1);
    }

    #[test]
    fn test_publish_event_targets_all_scopes() {
        let hub = ChangeBroadcaster::default();
        let _track = hub.subscribe(Scope::Track(TrackId(3)));
        let _project = hub.subscribe(Scope::Project(ProjectId(1)));

        assert_eq!(hub.publish_event(&event(3)), 2);
    }
}
