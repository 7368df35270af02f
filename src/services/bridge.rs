//! Delivery routing: straight to the local notifier, or through Redis so
//! every gateway instance notifies its own connections.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::models::event::DeliveryEvent;
use crate::repositories::RedisRepository;
use crate::services::delivery::{DeliveryNotifier, DeliveryReport};

const RESUBSCRIBE_MIN: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Where a dispatched event went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "routed", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Local(DeliveryReport),
    Published { channel: String, subscriber_count: u64 },
}

/// State of this instance's Redis delivery listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerStatus {
    /// No Redis; delivery is in-process.
    Local,
    Listening,
    /// Subscription lost (or never started); published events are not
    /// reaching this instance's connections.
    Down,
}

#[derive(Clone)]
struct RedisRoute {
    repo: Arc<RedisRepository>,
    channel: String,
    listening: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct DeliveryBridge {
    notifier: DeliveryNotifier,
    redis: Option<RedisRoute>,
}

impl DeliveryBridge {
    /// Single-instance routing: events go straight to the notifier.
    pub fn local(notifier: DeliveryNotifier) -> Self {
        Self {
            notifier,
            redis: None,
        }
    }

    /// Multi-instance routing over a Redis channel.
    pub fn with_redis(
        notifier: DeliveryNotifier,
        repo: Arc<RedisRepository>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            redis: Some(RedisRoute {
                repo,
                channel: channel.into(),
                listening: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.redis.is_some()
    }

    pub fn listener_status(&self) -> ListenerStatus {
        match &self.redis {
            None => ListenerStatus::Local,
            Some(route) if route.listening.load(Ordering::SeqCst) => ListenerStatus::Listening,
            Some(_) => ListenerStatus::Down,
        }
    }

    /// Route one already-validated event.
    pub async fn dispatch(&self, event: &DeliveryEvent) -> AppResult<DispatchOutcome> {
        match &self.redis {
            Some(route) => {
                let payload = serde_json::to_string(event)?;
                let subscriber_count = route.repo.publish(&route.channel, &payload).await?;
                info!(message_id = %event.id, channel = %route.channel, subscriber_count, "delivery published");
                Ok(DispatchOutcome::Published {
                    channel: route.channel.clone(),
                    subscriber_count,
                })
            }
            None => Ok(DispatchOutcome::Local(self.notifier.notify(event)?)),
        }
    }

    /// Start feeding the Redis channel into the local notifier. `None` when
    /// routing is local and there is nothing to listen to.
    ///
    /// The first subscription must succeed. After that, a dropped
    /// subscription is retried with backoff for the life of the task.
    pub async fn start(&self) -> AppResult<Option<JoinHandle<()>>> {
        let Some(route) = &self.redis else {
            return Ok(None);
        };
        let rx = route.repo.subscribe_to_channel(&route.channel).await?;
        route.listening.store(true, Ordering::SeqCst);

        let repo = route.repo.clone();
        let channel = route.channel.clone();
        let subscribe = move || {
            let repo = repo.clone();
            let channel = channel.clone();
            async move { repo.subscribe_to_channel(&channel).await }
        };
        let task = tokio::spawn(listen(
            self.notifier.clone(),
            route.channel.clone(),
            route.listening.clone(),
            rx,
            subscribe,
            Backoff::new(RESUBSCRIBE_MIN, RESUBSCRIBE_MAX),
        ));
        Ok(Some(task))
    }
}

/// Doubling retry delay, capped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay to wait now; the following one doubles.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Deliver bridged payloads until the subscription closes, then resubscribe.
async fn listen<F, Fut>(
    notifier: DeliveryNotifier,
    channel: String,
    listening: Arc<AtomicBool>,
    mut rx: broadcast::Receiver<String>,
    mut subscribe: F,
    mut backoff: Backoff,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<broadcast::Receiver<String>>>,
{
    loop {
        drain(&notifier, &channel, &mut rx).await;
        listening.store(false, Ordering::SeqCst);
        warn!(channel = %channel, "delivery listener lost its subscription");

        rx = loop {
            let delay = backoff.next_delay();
            tokio::time::sleep(delay).await;
            match subscribe().await {
                Ok(rx) => break rx,
                Err(e) => warn!(channel = %channel, error = %e, "resubscribe failed"),
            }
        };
        backoff.reset();
        listening.store(true, Ordering::SeqCst);
        info!(channel = %channel, "delivery listener resubscribed");
    }
}

async fn drain(notifier: &DeliveryNotifier, channel: &str, rx: &mut broadcast::Receiver<String>) {
    loop {
        match rx.recv().await {
            Ok(payload) => {
                deliver_payload(notifier, &payload);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(channel = %channel, skipped, "delivery listener lagged; events dropped")
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Decode one bridged payload and notify. Bad payloads are logged and skipped.
pub(crate) fn deliver_payload(notifier: &DeliveryNotifier, payload: &str) -> Option<DeliveryReport> {
    let event: DeliveryEvent = match serde_json::from_str(payload) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(error = %e, "undecodable delivery payload");
            return None;
        }
    };
    if let Err(e) = event.check() {
        warn!(message_id = %event.id, error = %e, "invalid delivery payload");
        return None;
    }
    match notifier.notify(&event) {
        Ok(report) => {
            debug!(message_id = %event.id, delivered = report.delivered, "bridged delivery");
            Some(report)
        }
        Err(e) => {
            warn!(message_id = %event.id, error = %e, "bridged delivery failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::presence::ConnectionId;
    use crate::services::connection::ConnectionHandle;
    use crate::services::presence::PresenceRegistry;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn payload(recipient: &str) -> String {
        json!({
            "_id": "m9",
            "senderId": "u2",
            "receiverId": recipient,
            "text": "over the bridge",
            "createdAt": "2024-03-01T10:00:00Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn local_dispatch_notifies_directly() {
        let reg = PresenceRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        reg.register("u1", ConnectionHandle::new(ConnectionId::from("c1"), tx))
            .unwrap();
        let bridge = DeliveryBridge::local(DeliveryNotifier::new(reg));
        assert!(!bridge.is_distributed());
        assert_eq!(bridge.listener_status(), ListenerStatus::Local);
        assert!(bridge.start().await.unwrap().is_none());

        let event: DeliveryEvent = serde_json::from_str(&payload("u1")).unwrap();
        let outcome = bridge.dispatch(&event).await.unwrap();
        match outcome {
            DispatchOutcome::Local(report) => assert_eq!(report.delivered, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn bridged_payload_is_delivered() {
        let reg = PresenceRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        reg.register("u1", ConnectionHandle::new(ConnectionId::from("c1"), tx))
            .unwrap();
        let notifier = DeliveryNotifier::new(reg);

        let report = deliver_payload(&notifier, &payload("u1")).unwrap();
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().unwrap().contains("over the bridge"));
    }

    #[test]
    fn bad_bridged_payloads_are_skipped() {
        let notifier = DeliveryNotifier::new(PresenceRegistry::new());
        assert!(deliver_payload(&notifier, "not json").is_none());
        assert!(deliver_payload(&notifier, &payload("")).is_none());
    }

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(350));
        assert_eq!(b.next_delay(), Duration::from_millis(350));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn redis_bridge_is_down_until_started() {
        let repo = Arc::new(RedisRepository::new("redis://127.0.0.1:1").unwrap());
        let bridge =
            DeliveryBridge::with_redis(DeliveryNotifier::new(PresenceRegistry::new()), repo, "ch");
        assert!(bridge.is_distributed());
        assert_eq!(bridge.listener_status(), ListenerStatus::Down);
    }

    #[tokio::test]
    async fn listener_resubscribes_after_subscription_ends() {
        let reg = PresenceRegistry::new();
        let (tx, mut conn_rx) = mpsc::channel(8);
        reg.register("u1", ConnectionHandle::new(ConnectionId::from("c1"), tx))
            .unwrap();

        let (first_tx, first_rx) = broadcast::channel::<String>(8);
        let (second_tx, second_rx) = broadcast::channel::<String>(8);
        let pending = Arc::new(parking_lot::Mutex::new(VecDeque::from([second_rx])));
        let attempts = Arc::new(AtomicUsize::new(0));

        let subscribe = {
            let pending = pending.clone();
            let attempts = attempts.clone();
            move || {
                attempts.fetch_add(1, Ordering::SeqCst);
                let next = pending.lock().pop_front();
                std::future::ready(
                    next.ok_or_else(|| AppError::Unavailable("redis down".to_string())),
                )
            }
        };
        let listening = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(listen(
            DeliveryNotifier::new(reg),
            "ch".to_string(),
            listening.clone(),
            first_rx,
            subscribe,
            Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        ));

        drop(first_tx);
        second_tx.send(payload("u1")).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), conn_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("over the bridge"));
        assert!(listening.load(Ordering::SeqCst));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        // subscription lost again and Redis stays unreachable
        drop(second_tx);
        let mut down = false;
        for _ in 0..100 {
            if !listening.load(Ordering::SeqCst) && attempts.load(Ordering::SeqCst) >= 3 {
                down = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(down, "listener should keep retrying while down");
        task.abort();
    }

    #[test]
    fn outcome_serializes_with_route_tag() {
        let v = serde_json::to_value(DispatchOutcome::Published {
            channel: "chatline:deliveries".into(),
            subscriber_count: 2,
        })
        .unwrap();
        assert_eq!(v["routed"], "published");
        assert_eq!(v["subscriber_count"], 2);

        let v = serde_json::to_value(DispatchOutcome::Local(DeliveryReport {
            recipient: "u1".into(),
            connections: 1,
            delivered: 1,
            failed: 0,
        }))
        .unwrap();
        assert_eq!(v["routed"], "local");
        assert_eq!(v["delivered"], 1);
    }
}
