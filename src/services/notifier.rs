use crate::domain::event::ServerEvent;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Socket-addressing construct. User rooms carry targeted deliveries
/// (new messages, badge notifications); thread rooms carry ephemeral
/// events (typing) to whoever has joined the thread view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(Uuid),
    Thread(Uuid),
}

#[derive(Clone, Debug)]
struct Metrics {
    sends_total: Counter<u64>,
    unrouted_total: Counter<u64>,
    active_rooms: UpDownCounter<i64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("tradeline-messaging");
        Self {
            sends_total: meter
                .u64_counter("tradeline_room_events_sent_total")
                .with_description("Events fanned out to room subscribers")
                .build(),
            unrouted_total: meter
                .u64_counter("tradeline_room_events_unrouted_total")
                .with_description("Events targeting a room with no live subscribers")
                .build(),
            active_rooms: meter
                .i64_up_down_counter("tradeline_rooms_active")
                .with_description("Number of rooms with a live channel")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("tradeline_rooms_reclaimed_total")
                .with_description("Stale rooms reclaimed by GC")
                .build(),
        }
    }
}

/// In-process room registry: one broadcast channel per room, created lazily
/// on subscribe and reclaimed by GC once the last receiver is gone.
///
/// Delivery is at-most-once per live connection. Nothing is queued for a
/// disconnected client; it re-syncs through the list/read path on reconnect.
#[derive(Clone, Debug)]
pub struct Notifier {
    rooms: Arc<DashMap<Room, broadcast::Sender<ServerEvent>>>,
    channel_capacity: usize,
    metrics: Metrics,
}

impl Notifier {
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self { rooms: Arc::new(DashMap::new()), channel_capacity, metrics: Metrics::new() }
    }

    /// Subscribes to a room, creating its channel if needed.
    #[must_use]
    pub fn subscribe(&self, room: Room) -> broadcast::Receiver<ServerEvent> {
        let tx = self
            .rooms
            .entry(room)
            .or_insert_with(|| {
                self.metrics.active_rooms.add(1, &[]);
                broadcast::channel(self.channel_capacity).0
            })
            .clone();
        tx.subscribe()
    }

    /// Emits an event to a room's live subscribers, if any.
    pub fn notify(&self, room: Room, event: ServerEvent) {
        if let Some(tx) = self.rooms.get(&room) {
            if tx.send(event).is_ok() {
                self.metrics.sends_total.add(1, &[KeyValue::new("room", room_label(room))]);
                return;
            }
        }
        tracing::trace!(?room, "No live subscriber for event");
        self.metrics.unrouted_total.add(1, &[KeyValue::new("room", room_label(room))]);
    }

    /// Emits an event to each user's room.
    pub fn notify_users(&self, user_ids: &[Uuid], event: &ServerEvent) {
        for user_id in user_ids {
            self.notify(Room::User(*user_id), event.clone());
        }
    }

    /// Reclaims rooms whose channels have no remaining receivers.
    pub fn perform_gc(&self) {
        let mut reclaimed = 0;
        self.rooms.retain(|_, tx| {
            let live = tx.receiver_count() > 0;
            if !live {
                self.metrics.active_rooms.add(-1, &[]);
                reclaimed += 1;
            }
            live
        });

        if reclaimed > 0 {
            self.metrics.gc_reclaimed_total.add(reclaimed, &[]);
            tracing::debug!(reclaimed, "Room GC reclaimed stale channels");
        }
    }
}

const fn room_label(room: Room) -> &'static str {
    match room {
        Room::User(_) => "user",
        Room::Thread(_) => "thread",
    }
}
