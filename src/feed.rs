//! Live event hub.
//!
//! Lifecycle and chat changes are published here after they are committed.
//! Every subscriber gets its own [`Subscription`] which only yields events the
//! subscribed user takes part in. [`Feed::disconnect`] ends all subscriptions
//! of a user at once, which is what logout does.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::data::room::{MessageResponse, RoomResponse};
use crate::data::session::SessionResponse;

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionCreated { session: SessionResponse },
    SessionBooked { session: SessionResponse },
    SessionCompleted { session: SessionResponse },
    SessionCancelled { session: SessionResponse },
    RoomOpened { room: RoomResponse },
    RoomClosed { room: RoomResponse },
    Message { message: MessageResponse, participants: [Uuid; 2] },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SessionCreated { .. } => "session_created",
            Event::SessionBooked { .. } => "session_booked",
            Event::SessionCompleted { .. } => "session_completed",
            Event::SessionCancelled { .. } => "session_cancelled",
            Event::RoomOpened { .. } => "room_opened",
            Event::RoomClosed { .. } => "room_closed",
            Event::Message { .. } => "message",
        }
    }

    /// Whether `user` takes part in the session or room the event is about.
    pub fn concerns(&self, user: Uuid) -> bool {
        match self {
            Event::SessionCreated { session }
            | Event::SessionBooked { session }
            | Event::SessionCompleted { session }
            | Event::SessionCancelled { session } => {
                session.tutor_id == user
                    || session.booking.as_ref().map(|b| b.student_id) == Some(user)
            }
            Event::RoomOpened { room } | Event::RoomClosed { room } => {
                room.student_id == user || room.tutor_id == user
            }
            Event::Message { participants, .. } => participants.contains(&user),
        }
    }
}

pub struct Feed {
    events: broadcast::Sender<Event>,
    // One close signal per user, shared by all of that user's subscriptions.
    closers: Mutex<HashMap<Uuid, watch::Sender<bool>>>,
}

impl Default for Feed {
    fn default() -> Self {
        Feed::new()
    }
}

impl Feed {
    pub fn new() -> Feed {
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Feed {
            events,
            closers: Mutex::new(HashMap::new()),
        }
    }

    pub fn publish(&self, event: Event) {
        tracing::trace!("publishing {} event", event.name());
        // Err only means nobody is listening right now.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self, user: Uuid) -> Subscription {
        let mut closers = self.closers.lock().unwrap_or_else(PoisonError::into_inner);
        closers.retain(|_, closer| closer.receiver_count() > 0);

        let closed = closers
            .entry(user)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();

        Subscription {
            user,
            events: self.events.subscribe(),
            closed,
        }
    }

    /// Ends every open subscription of `user`. Returns how many were open.
    pub fn disconnect(&self, user: Uuid) -> usize {
        let closer = self
            .closers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);

        match closer {
            Some(closer) => {
                let open = closer.receiver_count();
                closer.send_replace(true);
                tracing::debug!("closed {} subscription(s) of user {}", open, user);
                open
            }
            None => 0,
        }
    }

    pub fn subscriber_count(&self, user: Uuid) -> usize {
        self.closers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .map_or(0, |closer| closer.receiver_count())
    }
}

/// Stream of events concerning one user. Dropping it unsubscribes.
pub struct Subscription {
    user: Uuid,
    events: broadcast::Receiver<Event>,
    closed: watch::Receiver<bool>,
}

impl Subscription {
    pub fn user(&self) -> Uuid {
        self.user
    }

    /// Next relevant event, or `None` once the subscription was closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            if *self.closed.borrow() {
                return None;
            }

            tokio::select! {
                changed = self.closed.changed() => {
                    if changed.is_err() || *self.closed.borrow() {
                        return None;
                    }
                }
                event = self.events.recv() => match event {
                    Ok(event) if event.concerns(self.user) => return Some(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("subscriber {} lagged behind by {} events", self.user, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}
