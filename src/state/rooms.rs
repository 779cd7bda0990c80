use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{dto::events::RoomEvent, state::competition::CompetitionId};

/// Broadcast hub for a single competition room.
pub struct RoomHub {
    sender: broadcast::Sender<RoomEvent>,
}

impl RoomHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, returning how many received it.
    pub fn broadcast(&self, event: RoomEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Rooms keyed by competition id, created lazily on first use.
pub struct RoomRegistry {
    rooms: DashMap<CompetitionId, RoomHub>,
    capacity: usize,
}

impl RoomRegistry {
    /// Empty registry whose rooms buffer `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to the room of `id`.
    pub fn subscribe(&self, id: CompetitionId) -> broadcast::Receiver<RoomEvent> {
        self.rooms
            .entry(id)
            .or_insert_with(|| RoomHub::new(self.capacity))
            .subscribe()
    }

    /// Publish `event` to the room of `id`. Events for rooms nobody joined are dropped.
    pub fn publish(&self, id: CompetitionId, event: RoomEvent) -> usize {
        match self.rooms.get(&id) {
            Some(room) => room.broadcast(event),
            None => 0,
        }
    }

    /// Number of subscribers currently in the room of `id`.
    pub fn subscriber_count(&self, id: CompetitionId) -> usize {
        self.rooms
            .get(&id)
            .map(|room| room.subscriber_count())
            .unwrap_or(0)
    }

    /// Drop the room of `id`; remaining subscribers observe a closed channel.
    pub fn close(&self, id: CompetitionId) {
        self.rooms.remove(&id);
    }

    /// Receiver with no sender behind it, for competitions that will publish nothing more.
    pub fn closed() -> broadcast::Receiver<RoomEvent> {
        let (_sender, receiver) = broadcast::channel(1);
        receiver
    }

    /// Number of rooms currently open.
    pub fn open_rooms(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::dto::events::ParticipantJoinedEvent;

    fn joined(name: &str) -> RoomEvent {
        RoomEvent::ParticipantJoined(ParticipantJoinedEvent {
            username: name.into(),
        })
    }

    #[tokio::test]
    async fn events_stay_in_their_room() {
        let registry = RoomRegistry::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut in_a = registry.subscribe(a);
        let mut in_b = registry.subscribe(b);

        assert_eq!(registry.publish(a, joined("bob")), 1);
        assert_eq!(in_a.recv().await.unwrap(), joined("bob"));
        assert!(in_b.try_recv().is_err());
    }

    #[test]
    fn publishing_to_unknown_room_is_a_noop() {
        let registry = RoomRegistry::new(8);
        assert_eq!(registry.publish(Uuid::new_v4(), joined("bob")), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let registry = RoomRegistry::new(2);
        let id = Uuid::new_v4();
        let mut rx = registry.subscribe(id);
        for name in ["a", "b", "c"] {
            registry.publish(id, joined(name));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }

    #[tokio::test]
    async fn closing_a_room_ends_subscriptions() {
        let registry = RoomRegistry::new(2);
        let id = Uuid::new_v4();
        let mut rx = registry.subscribe(id);
        registry.close(id);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(registry.subscriber_count(id), 0);
        assert_eq!(registry.open_rooms(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_ends_immediately() {
        let mut rx = RoomRegistry::closed();
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
