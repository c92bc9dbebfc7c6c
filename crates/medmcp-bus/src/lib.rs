use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use medmcp_schema::BusMessage;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    SessionCreated,
    SymptomsAnalyzed,
    DiagnosisValidated,
    PrescriptionGenerated,
    InteractionsChecked,
    GuidelinesProvided,
    SessionClosed,
    AiDegraded,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::SessionCreated,
        Topic::SymptomsAnalyzed,
        Topic::DiagnosisValidated,
        Topic::PrescriptionGenerated,
        Topic::InteractionsChecked,
        Topic::GuidelinesProvided,
        Topic::SessionClosed,
        Topic::AiDegraded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SessionCreated => "session_created",
            Topic::SymptomsAnalyzed => "symptoms_analyzed",
            Topic::DiagnosisValidated => "diagnosis_validated",
            Topic::PrescriptionGenerated => "prescription_generated",
            Topic::InteractionsChecked => "interactions_checked",
            Topic::GuidelinesProvided => "guidelines_provided",
            Topic::SessionClosed => "session_closed",
            Topic::AiDegraded => "ai_degraded",
        }
    }

    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::SessionCreated { .. } => Topic::SessionCreated,
            BusMessage::SymptomsAnalyzed { .. } => Topic::SymptomsAnalyzed,
            BusMessage::DiagnosisValidated { .. } => Topic::DiagnosisValidated,
            BusMessage::PrescriptionGenerated { .. } => Topic::PrescriptionGenerated,
            BusMessage::InteractionsChecked { .. } => Topic::InteractionsChecked,
            BusMessage::GuidelinesProvided { .. } => Topic::GuidelinesProvided,
            BusMessage::SessionClosed { .. } => Topic::SessionClosed,
            BusMessage::AiDegraded { .. } => Topic::AiDegraded,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]; pass it to
/// [`EventBus::unsubscribe`] to detach.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::Sender<BusMessage>,
}

type Subscribers = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

pub struct EventBus {
    subscribers: Subscribers,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(Subscriber { id, tx });
        Subscription { id, topic, rx }
    }

    /// Returns false when the id was not registered under `topic`.
    pub async fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().await;
        let Some(list) = subs.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        before != list.len()
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        let subs = self.subscribers.read().await;
        subs.get(&topic)
            .map(|list| list.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        publish_to(&self.subscribers, msg).await
    }
}

async fn publish_to(subscribers: &Subscribers, msg: BusMessage) -> Result<()> {
    let topic = Topic::from_message(&msg);
    let mut has_closed = false;
    {
        let subs = subscribers.read().await;
        if let Some(list) = subs.get(&topic) {
            for sub in list {
                if sub.tx.is_closed() {
                    has_closed = true;
                    continue;
                }
                if sub.tx.try_send(msg.clone()).is_err() {
                    tracing::debug!(?topic, "subscriber queue full, dropping event");
                }
            }
        }
    }
    // Dropped receivers count as an implicit unsubscribe.
    if has_closed {
        let mut subs = subscribers.write().await;
        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|s| !s.tx.is_closed());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medmcp_schema::{ProviderTag, SessionId};
    use tokio::time::{timeout, Duration};

    fn created_message() -> BusMessage {
        BusMessage::SessionCreated {
            session_id: SessionId::new(),
            patient_name: "Jane Doe".into(),
            provider: ProviderTag::Gemini,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_succeeds() {
        let bus = EventBus::new(8);
        assert!(bus.publish(created_message()).await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe(Topic::SessionCreated).await;

        bus.publish(created_message()).await.unwrap();

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::SessionCreated { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_same_topic() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe(Topic::SessionCreated).await;
        let mut b = bus.subscribe(Topic::SessionCreated).await;

        bus.publish(created_message()).await.unwrap();

        let got_a = timeout(Duration::from_millis(100), a.recv()).await.unwrap();
        let got_b = timeout(Duration::from_millis(100), b.recv()).await.unwrap();
        assert!(got_a.is_some());
        assert!(got_b.is_some());
    }

    #[tokio::test]
    async fn different_topics_no_crosstalk() {
        let bus = EventBus::new(8);
        let mut closed = bus.subscribe(Topic::SessionClosed).await;

        bus.publish(created_message()).await.unwrap();

        let received = timeout(Duration::from_millis(50), closed.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe(Topic::SessionCreated).await;
        assert!(bus.unsubscribe(Topic::SessionCreated, sub.id).await);
        assert!(!bus.unsubscribe(Topic::SessionCreated, sub.id).await);

        bus.publish(created_message()).await.unwrap();
        // Sender was dropped with the registry entry.
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_publish() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe(Topic::SessionCreated).await;
        let _keep = bus.subscribe(Topic::SessionCreated).await;
        drop(sub);

        bus.publish(created_message()).await.unwrap();
        assert_eq!(bus.subscriber_count(Topic::SessionCreated).await, 1);
    }

    #[tokio::test]
    async fn channel_backpressure_drops_when_full() {
        let bus = EventBus::new(1);
        let mut sub = bus.subscribe(Topic::SessionCreated).await;

        bus.publish(created_message()).await.unwrap();
        bus.publish(created_message()).await.unwrap();

        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn topic_from_message_matches_variant() {
        let id = SessionId::new();
        let msg = BusMessage::AiDegraded {
            session_id: id,
            operation: "set_diagnosis".into(),
            reason: "timeout".into(),
        };
        assert_eq!(Topic::from_message(&msg), Topic::AiDegraded);
        assert_eq!(Topic::from_message(&created_message()), Topic::SessionCreated);
    }
}
