//! Session lifecycle.
//!
//! Every state change runs as one store transaction: read, check, write,
//! commit. Status changes are compare-and-swap on the status read at the
//! start, so of two racing transactions at most one wins. Events are only
//! published after a successful commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::data::room::{room_id, Room};
use crate::data::session::{Booking, Session, SessionDraft, SessionStatus};
use crate::data::user::User;
use crate::error::{LifecycleError, StoreError, ValidationError};
use crate::feed::{Event, Feed};
use crate::role::Role;
use crate::store::{SessionQuery, Store, Transaction};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SessionManager<S> {
    store: S,
    feed: Feed,
    clock: Clock,
}

impl<S: Store> SessionManager<S> {
    pub fn new(store: S) -> Self {
        SessionManager::with_clock(store, Arc::new(Utc::now))
    }

    pub fn with_clock(store: S, clock: Clock) -> Self {
        SessionManager {
            store,
            feed: Feed::new(),
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    #[tracing::instrument(skip(self, draft))]
    pub async fn create_session(
        &self,
        tutor_id: Uuid,
        draft: &SessionDraft,
    ) -> Result<Session, LifecycleError> {
        let now = self.now();
        let valid = draft.validate(now).map_err(|e| {
            tracing::debug!("rejected session draft: {}", e);
            e
        })?;

        let mut tx = self.store.begin().await?;
        let tutor = tx
            .user(tutor_id)
            .await?
            .filter(|u| u.role().can_teach())
            .ok_or_else(|| LifecycleError::not_found("tutor", tutor_id))?;
        // Concurrent creates for one tutor collide here instead of both
        // passing the overlap check.
        tx.touch_user(tutor_id).await?;

        let existing = tx.sessions(&SessionQuery::tutor(tutor_id)).await?;
        if let Some(clash) = valid.first_overlap(&existing) {
            tracing::debug!("session draft overlaps session {}", clash.id);
            return Err(ValidationError::Overlap { existing: clash.id }.into());
        }

        let session = Session {
            id: Uuid::new_v4(),
            tutor_id,
            tutor_name: tutor.name,
            subject: valid.subject,
            date: valid.date,
            time: valid.time,
            starts_at: valid.interval.start,
            duration_hours: valid.duration_hours,
            price: valid.price,
            status: SessionStatus::Available,
            created_at: now,
            booking: None,
            completed_at: None,
        };
        tx.insert_session(&session).await?;
        tx.commit().await?;

        tracing::info!("tutor {} created session {}", tutor_id, session.id);
        self.feed.publish(Event::SessionCreated {
            session: session.clone().into(),
        });
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    pub async fn book_session(
        &self,
        tutor_id: Uuid,
        session_id: Uuid,
        student_id: Uuid,
    ) -> Result<Session, LifecycleError> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let tutor = tx
            .user(tutor_id)
            .await?
            .filter(|u| u.role().can_teach())
            .ok_or_else(|| LifecycleError::not_found("tutor", tutor_id))?;
        let student = tx
            .user(student_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("student", student_id))?;
        if student.role() != Role::Student {
            return Err(LifecycleError::Forbidden(
                "only students can book sessions".to_string(),
            ));
        }
        let mut session = tx
            .session(session_id)
            .await?
            .filter(|s| s.tutor_id == tutor_id)
            .ok_or_else(|| LifecycleError::not_found("session", session_id))?;

        match session.status {
            SessionStatus::Available => {}
            SessionStatus::Booked if session.student_id() == Some(student_id) => {
                tracing::debug!("student already holds session {}", session_id);
                return Err(LifecycleError::Conflict(
                    "session is already booked by this student".to_string(),
                ));
            }
            _ => return Err(not_available()),
        }

        session.status = SessionStatus::Booked;
        session.tutor_name = tutor.name;
        session.booking = Some(Booking {
            student_id,
            student_name: student.name,
            booked_at: now,
        });
        if !tx.swap_session(&session, SessionStatus::Available).await? {
            return Err(not_available());
        }

        // Always written, so a concurrent close of the same room conflicts.
        let room = Room::new(student_id, tutor_id, now);
        let opened = tx.open_room(&room).await?.then_some(room);
        tx.commit().await?;

        tracing::info!("student {} booked session {}", student_id, session_id);
        self.feed.publish(Event::SessionBooked {
            session: session.clone().into(),
        });
        if let Some(room) = opened {
            tracing::info!("opened room {}", room.id);
            self.feed.publish(Event::RoomOpened { room: room.into() });
        }
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_session(
        &self,
        actor: Uuid,
        session_id: Uuid,
    ) -> Result<Session, LifecycleError> {
        let now = self.now();
        let mut tx = self.store.begin().await?;

        let mut session = tx
            .session(session_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("session", session_id))?;
        if session.tutor_id != actor {
            return Err(LifecycleError::Forbidden(
                "only the session's tutor can complete it".to_string(),
            ));
        }
        match session.status {
            SessionStatus::Booked => {}
            SessionStatus::Completed => {
                return Err(LifecycleError::State(
                    "session is already completed".to_string(),
                ))
            }
            SessionStatus::Available => {
                return Err(LifecycleError::State(
                    "session has not been booked".to_string(),
                ))
            }
        }

        session.status = SessionStatus::Completed;
        session.completed_at = Some(now);
        if !tx.swap_session(&session, SessionStatus::Booked).await? {
            return Err(LifecycleError::Conflict(
                "session was modified concurrently".to_string(),
            ));
        }
        let closed = close_idle_room(&mut tx, &session).await?;
        tx.commit().await?;

        tracing::info!("session {} completed", session_id);
        self.feed.publish(Event::SessionCompleted {
            session: session.clone().into(),
        });
        self.publish_closed(closed);
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_session(&self, actor: Uuid, session_id: Uuid) -> Result<(), LifecycleError> {
        let mut tx = self.store.begin().await?;

        let session = tx
            .session(session_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("session", session_id))?;
        if session.tutor_id != actor && session.student_id() != Some(actor) {
            return Err(LifecycleError::Forbidden(
                "only the tutor or the booked student can cancel this session".to_string(),
            ));
        }
        if session.status == SessionStatus::Completed {
            tracing::debug!("refusing to cancel completed session {}", session_id);
            return Err(LifecycleError::State(
                "completed sessions cannot be cancelled".to_string(),
            ));
        }

        if !tx.delete_session(session_id, session.status).await? {
            return Err(LifecycleError::Conflict(
                "session was modified concurrently".to_string(),
            ));
        }
        let closed = match session.status {
            SessionStatus::Booked => close_idle_room(&mut tx, &session).await?,
            _ => None,
        };
        tx.commit().await?;

        tracing::info!("user {} cancelled session {}", actor, session_id);
        self.feed.publish(Event::SessionCancelled {
            session: session.into(),
        });
        self.publish_closed(closed);
        Ok(())
    }

    /// Sessions of a tutor that are still open for booking, earliest first.
    pub async fn tutor_catalog(&self, tutor_id: Uuid) -> Result<Vec<Session>, LifecycleError> {
        match self.store.get_user(tutor_id).await? {
            Some(tutor) if tutor.role().can_teach() => {}
            _ => return Err(LifecycleError::not_found("tutor", tutor_id)),
        }
        Ok(self
            .store
            .find_sessions(&SessionQuery::tutor(tutor_id).with_status(SessionStatus::Available))
            .await?)
    }

    /// All sessions a tutor offers or a student booked. Admins see everything.
    pub async fn sessions_of(&self, user: &User) -> Result<Vec<Session>, LifecycleError> {
        let query = match user.role() {
            Role::Tutor => SessionQuery::tutor(user.id),
            Role::Student => SessionQuery::student(user.id),
            Role::Admin => SessionQuery::default(),
        };
        Ok(self.store.find_sessions(&query).await?)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, LifecycleError> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("session", session_id))
    }

    fn publish_closed(&self, closed: Option<Room>) {
        if let Some(room) = closed {
            tracing::info!("closed room {}", room.id);
            self.feed.publish(Event::RoomClosed { room: room.into() });
        }
    }
}

fn not_available() -> LifecycleError {
    LifecycleError::Conflict("session is not available".to_string())
}

/// Deletes the pair's room once no booked session is left between them.
/// Must run after the session itself was updated in `tx`.
async fn close_idle_room<T: Transaction>(
    tx: &mut T,
    session: &Session,
) -> Result<Option<Room>, StoreError> {
    let student_id = match session.student_id() {
        Some(it) => it,
        None => return Ok(None),
    };

    let remaining = tx
        .sessions(&SessionQuery::pair(student_id, session.tutor_id).with_status(SessionStatus::Booked))
        .await?;
    if !remaining.is_empty() {
        return Ok(None);
    }

    let key = room_id(student_id, session.tutor_id);
    let room = tx.room(&key).await?;
    if room.is_some() {
        tx.delete_room(&key).await?;
    }
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::room::Message;
    use crate::data::user::{Gender, PasswordHash, Profile};
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn user(name: &str, profile: Profile) -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", name.to_lowercase()),
            name: name.to_string(),
            pw_hash: PasswordHash::new("password").unwrap(),
            province: "Amman".to_string(),
            gender: Gender::Female,
            created_at: fixed_now(),
            profile,
        }
    }

    struct Fixture {
        manager: SessionManager<MemoryStore>,
        tutor: User,
        student: User,
    }

    impl Fixture {
        async fn new() -> Fixture {
            let manager = SessionManager::with_clock(MemoryStore::new(), Arc::new(fixed_now));
            let tutor = user(
                "Tutor",
                Profile::Tutor {
                    rate: Some(20.0),
                    grades: Default::default(),
                },
            );
            let student = user("Student", Profile::Student { grade: None });
            manager.store().insert_user(&tutor).await.unwrap();
            manager.store().insert_user(&student).await.unwrap();
            Fixture {
                manager,
                tutor,
                student,
            }
        }

        async fn add_student(&self, name: &str) -> User {
            let student = user(name, Profile::Student { grade: None });
            self.manager.store().insert_user(&student).await.unwrap();
            student
        }

        async fn create(&self, date: &str, time: &str, hours: f64) -> Result<Session, LifecycleError> {
            let draft = SessionDraft {
                subject: "Math".to_string(),
                date: date.to_string(),
                time: time.to_string(),
                duration_hours: hours,
                price: 20.0,
            };
            self.manager.create_session(self.tutor.id, &draft).await
        }

        async fn book(&self, session: &Session, student: &User) -> Result<Session, LifecycleError> {
            self.manager
                .book_session(self.tutor.id, session.id, student.id)
                .await
        }

        async fn room_exists(&self, student: &User) -> bool {
            self.manager
                .store()
                .get_room(&room_id(student.id, self.tutor.id))
                .await
                .unwrap()
                .is_some()
        }
    }

    #[rocket::async_test]
    async fn booking_moves_session_out_of_catalog() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        assert_eq!(session.status, SessionStatus::Available);
        assert_eq!(f.manager.tutor_catalog(f.tutor.id).await.unwrap().len(), 1);

        let booked = f.book(&session, &f.student).await.unwrap();
        assert_eq!(booked.status, SessionStatus::Booked);
        assert_eq!(booked.tutor_name, "Tutor");
        assert_eq!(booked.student_id(), Some(f.student.id));

        assert!(f.manager.tutor_catalog(f.tutor.id).await.unwrap().is_empty());
        let mine = f.manager.sessions_of(&f.student).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status, SessionStatus::Booked);
        assert!(f.room_exists(&f.student).await);
    }

    #[rocket::async_test]
    async fn overlapping_session_is_rejected() {
        let f = Fixture::new().await;
        let first = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();

        let err = f.create("2025-06-01", "10:30 AM", 1.0).await.unwrap_err();
        match err {
            LifecycleError::Validation(ValidationError::Overlap { existing }) => {
                assert_eq!(existing, first.id)
            }
            other => panic!("expected overlap, got {:?}", other),
        }
    }

    #[rocket::async_test]
    async fn touching_sessions_are_accepted() {
        let f = Fixture::new().await;
        f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.create("2025-06-01", "11:00 AM", 1.0).await.unwrap();
        f.create("2025-06-01", "9:00 AM", 1.0).await.unwrap();
        assert_eq!(f.manager.tutor_catalog(f.tutor.id).await.unwrap().len(), 3);
    }

    #[rocket::async_test]
    async fn completed_sessions_free_the_schedule() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.book(&session, &f.student).await.unwrap();
        f.manager.complete_session(f.tutor.id, session.id).await.unwrap();

        f.create("2025-06-01", "10:30 AM", 1.0).await.unwrap();
    }

    #[rocket::async_test]
    async fn completing_last_booking_closes_room() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.book(&session, &f.student).await.unwrap();
        let room = room_id(f.student.id, f.tutor.id);
        let mut tx = f.manager.store().begin().await.unwrap();
        let sent = tx
            .insert_message(&Message {
                id: Uuid::new_v4(),
                room_id: room.clone(),
                sender_id: f.student.id,
                sender_name: "Student".to_string(),
                text: "see you".to_string(),
                sent_at: fixed_now(),
            })
            .await
            .unwrap();
        assert!(sent);
        tx.commit().await.unwrap();

        let completed = f.manager.complete_session(f.tutor.id, session.id).await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.completed_at, Some(fixed_now()));

        let stored = f.manager.get_session(session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(!f.room_exists(&f.student).await);
        assert!(f.manager.store().messages(&room).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn room_survives_while_pair_has_bookings() {
        let f = Fixture::new().await;
        let first = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        let second = f.create("2025-06-02", "10:00 AM", 1.0).await.unwrap();
        f.book(&first, &f.student).await.unwrap();
        f.book(&second, &f.student).await.unwrap();

        f.manager.complete_session(f.tutor.id, first.id).await.unwrap();
        assert!(f.room_exists(&f.student).await);

        f.manager.cancel_session(f.student.id, second.id).await.unwrap();
        assert!(!f.room_exists(&f.student).await);
        assert!(f.manager.sessions_of(&f.student).await.unwrap().len() == 1);
    }

    #[rocket::async_test]
    async fn completed_sessions_cannot_be_cancelled() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.book(&session, &f.student).await.unwrap();
        let completed = f.manager.complete_session(f.tutor.id, session.id).await.unwrap();

        let err = f
            .manager
            .cancel_session(f.tutor.id, session.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(f.manager.get_session(session.id).await.unwrap(), completed);

        let err = f
            .manager
            .complete_session(f.tutor.id, session.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[rocket::async_test]
    async fn concurrent_bookings_have_one_winner() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        let other = f.add_student("Other").await;

        let (a, b) = tokio::join!(f.book(&session, &f.student), f.book(&session, &other));
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser.kind(), ErrorKind::Conflict);

        assert!(f.manager.tutor_catalog(f.tutor.id).await.unwrap().is_empty());
        let tutor_sessions = f.manager.sessions_of(&f.tutor).await.unwrap();
        assert_eq!(tutor_sessions.len(), 1);
        assert_eq!(tutor_sessions[0].status, SessionStatus::Booked);
    }

    #[rocket::async_test]
    async fn concurrent_overlapping_creates_have_one_winner() {
        let f = Fixture::new().await;

        let (a, b) = tokio::join!(
            f.create("2025-06-01", "10:00 AM", 1.0),
            f.create("2025-06-01", "10:30 AM", 1.0)
        );
        assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(f.manager.tutor_catalog(f.tutor.id).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn booking_while_cancelling_keeps_the_room() {
        let f = Fixture::new().await;
        let first = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        let second = f.create("2025-06-02", "10:00 AM", 1.0).await.unwrap();
        f.book(&first, &f.student).await.unwrap();

        let (cancelled, booked) = tokio::join!(
            f.manager.cancel_session(f.student.id, first.id),
            f.book(&second, &f.student)
        );
        cancelled.unwrap();
        booked.unwrap();

        assert!(f.room_exists(&f.student).await);
        let mine = f.manager.sessions_of(&f.student).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, second.id);
    }

    #[rocket::async_test]
    async fn rebooking_reuses_the_open_room() {
        let f = Fixture::new().await;
        let first = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        let second = f.create("2025-06-02", "10:00 AM", 1.0).await.unwrap();
        f.book(&first, &f.student).await.unwrap();
        let room = f
            .manager
            .store()
            .get_room(&room_id(f.student.id, f.tutor.id))
            .await
            .unwrap();

        let mut feed = f.manager.feed().subscribe(f.student.id);
        f.book(&second, &f.student).await.unwrap();
        assert!(matches!(feed.recv().await, Some(Event::SessionBooked { .. })));

        let after = f
            .manager
            .store()
            .get_room(&room_id(f.student.id, f.tutor.id))
            .await
            .unwrap();
        assert_eq!(after, room, "room keeps its creation time");
        assert_eq!(f.manager.store().rooms_of(f.student.id).await.unwrap().len(), 1);
    }

    #[rocket::async_test]
    async fn duplicate_booking_is_a_conflict() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.book(&session, &f.student).await.unwrap();

        let err = f.book(&session, &f.student).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "session is already booked by this student");
    }

    #[rocket::async_test]
    async fn booking_checks_participants() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();

        let err = f
            .manager
            .book_session(Uuid::new_v4(), session.id, f.student.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .manager
            .book_session(f.tutor.id, Uuid::new_v4(), f.student.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .manager
            .book_session(f.tutor.id, session.id, f.tutor.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[rocket::async_test]
    async fn only_the_tutor_completes() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();

        let err = f
            .manager
            .complete_session(f.tutor.id, session.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State, "available sessions can't complete");

        f.book(&session, &f.student).await.unwrap();
        let err = f
            .manager
            .complete_session(f.student.id, session.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[rocket::async_test]
    async fn tutor_can_withdraw_an_open_slot() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();

        let err = f
            .manager
            .cancel_session(f.student.id, session.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        f.manager.cancel_session(f.tutor.id, session.id).await.unwrap();
        assert_eq!(
            f.manager.get_session(session.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[rocket::async_test]
    async fn failed_operations_leave_store_untouched() {
        let f = Fixture::new().await;
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.book(&session, &f.student).await.unwrap();
        let before = f.manager.sessions_of(&f.tutor).await.unwrap();

        assert!(f.create("2025-06-01", "10:15 AM", 0.5).await.is_err());
        assert!(f.book(&session, &f.student).await.is_err());
        assert!(f.manager.cancel_session(Uuid::new_v4(), session.id).await.is_err());

        assert_eq!(f.manager.sessions_of(&f.tutor).await.unwrap(), before);
        assert!(f.room_exists(&f.student).await);
    }

    #[rocket::async_test]
    async fn lifecycle_events_reach_participants() {
        let f = Fixture::new().await;
        let mut student_feed = f.manager.feed().subscribe(f.student.id);
        let session = f.create("2025-06-01", "10:00 AM", 1.0).await.unwrap();
        f.book(&session, &f.student).await.unwrap();

        assert!(matches!(student_feed.recv().await, Some(Event::SessionBooked { .. })));
        assert!(matches!(student_feed.recv().await, Some(Event::RoomOpened { .. })));
    }
}
