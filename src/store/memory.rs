//! In-process store. A transaction holds the store lock for its whole
//! lifetime and works on a private copy, so memory transactions are fully
//! serialized and an uncommitted transaction leaves no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{SessionQuery, Store, Transaction};
use crate::data::moderation::{BanRecord, Report};
use crate::data::review::Review;
use crate::data::room::{Message, Room};
use crate::data::session::{Session, SessionStatus};
use crate::data::user::User;
use crate::error::StoreError;
use crate::role::Role;

#[derive(Debug, Clone, Default)]
struct Collections {
    users: BTreeMap<Uuid, User>,
    sessions: BTreeMap<Uuid, Session>,
    rooms: BTreeMap<String, Room>,
    messages: Vec<Message>,
    reports: Vec<Report>,
    bans: BTreeMap<Uuid, BanRecord>,
    reviews: Vec<Review>,
}

impl Collections {
    fn sessions(&self, query: &SessionQuery) -> Vec<Session> {
        let mut found: Vec<Session> = self
            .sessions
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.starts_at);
        found
    }

    fn swap_session(&mut self, session: &Session, expected: SessionStatus) -> bool {
        match self.sessions.get_mut(&session.id) {
            Some(stored) if stored.status == expected => {
                *stored = session.clone();
                true
            }
            _ => false,
        }
    }

    fn delete_session(&mut self, id: Uuid, expected: SessionStatus) -> bool {
        match self.sessions.get(&id) {
            Some(stored) if stored.status == expected => {
                self.sessions.remove(&id);
                true
            }
            _ => false,
        }
    }

    fn delete_room(&mut self, id: &str) -> bool {
        let removed = self.rooms.remove(id).is_some();
        self.messages.retain(|m| m.room_id != id);
        removed
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<Collections>,
    staged: Collections,
}

impl Transaction for MemoryTx {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.staged.users.get(&id).cloned())
    }

    async fn touch_user(&mut self, _id: Uuid) -> Result<(), StoreError> {
        Ok(())
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.staged.sessions.get(&id).cloned())
    }

    async fn sessions(&mut self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        Ok(self.staged.sessions(query))
    }

    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError> {
        if self.staged.sessions.contains_key(&session.id) {
            return Err(StoreError::Duplicate);
        }
        self.staged.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn swap_session(
        &mut self,
        session: &Session,
        expected: SessionStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.staged.swap_session(session, expected))
    }

    async fn delete_session(
        &mut self,
        id: Uuid,
        expected: SessionStatus,
    ) -> Result<bool, StoreError> {
        Ok(self.staged.delete_session(id, expected))
    }

    async fn room(&mut self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.staged.rooms.get(id).cloned())
    }

    async fn open_room(&mut self, room: &Room) -> Result<bool, StoreError> {
        if self.staged.rooms.contains_key(&room.id) {
            return Ok(false);
        }
        self.staged.rooms.insert(room.id.clone(), room.clone());
        Ok(true)
    }

    async fn delete_room(&mut self, id: &str) -> Result<bool, StoreError> {
        Ok(self.staged.delete_room(id))
    }

    async fn insert_message(&mut self, message: &Message) -> Result<bool, StoreError> {
        if !self.staged.rooms.contains_key(&message.room_id) {
            return Ok(false);
        }
        self.staged.messages.push(message.clone());
        Ok(true)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = self.inner.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx { guard, staged })
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut data = self.inner.lock().await;
        let taken = data.users.contains_key(&user.id)
            || data
                .users
                .values()
                .any(|u| u.email.eq_ignore_ascii_case(&user.email));
        if taken {
            return Err(StoreError::Duplicate);
        }
        data.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn replace_user(&self, user: &User) -> Result<bool, StoreError> {
        let mut data = self.inner.lock().await;
        match data.users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .users
            .values()
            .filter(|u| role.map_or(true, |r| u.role() == r))
            .cloned()
            .collect())
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.remove(&id))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn find_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        Ok(self.inner.lock().await.sessions(query))
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.inner.lock().await.rooms.get(id).cloned())
    }

    async fn rooms_of(&self, user: Uuid) -> Result<Vec<Room>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .rooms
            .values()
            .filter(|r| r.has_participant(user))
            .cloned()
            .collect())
    }

    async fn messages(&self, room: &str) -> Result<Vec<Message>, StoreError> {
        let mut found: Vec<Message> = self
            .inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.room_id == room)
            .cloned()
            .collect();
        // stable, so equal timestamps keep insertion order
        found.sort_by_key(|m| m.sent_at);
        Ok(found)
    }

    async fn insert_report(&self, report: &Report) -> Result<(), StoreError> {
        self.inner.lock().await.reports.push(report.clone());
        Ok(())
    }

    async fn reports(&self) -> Result<Vec<Report>, StoreError> {
        Ok(self.inner.lock().await.reports.clone())
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        let mut data = self.inner.lock().await;
        if data.bans.contains_key(&ban.tutor_id) {
            return Err(StoreError::Duplicate);
        }
        data.bans.insert(ban.tutor_id, ban.clone());
        Ok(())
    }

    async fn find_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.inner.lock().await.bans.get(&tutor).cloned())
    }

    async fn find_ban_by_email(&self, email: &str) -> Result<Option<BanRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .bans
            .values()
            .find(|b| b.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn delete_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError> {
        Ok(self.inner.lock().await.bans.remove(&tutor))
    }

    async fn bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        Ok(self.inner.lock().await.bans.values().cloned().collect())
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        self.inner.lock().await.reviews.push(review.clone());
        Ok(())
    }

    async fn reviews_of(&self, tutor: Uuid) -> Result<Vec<Review>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .reviews
            .iter()
            .filter(|r| r.tutor_id == tutor)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::room::room_id;
    use chrono::Utc;

    fn room() -> Room {
        Room::new(Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    }

    fn message(room: &Room, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            room_id: room.id.clone(),
            sender_id: room.student_id,
            sender_name: "Student".to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        }
    }

    #[rocket::async_test]
    async fn uncommitted_transactions_leave_no_trace() {
        let store = MemoryStore::new();
        let room = room();

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.open_room(&room).await.unwrap());
            assert!(tx.room(&room.id).await.unwrap().is_some(), "reads own writes");
        }

        assert!(store.get_room(&room.id).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn committed_transactions_are_visible() {
        let store = MemoryStore::new();
        let room = room();

        let mut tx = store.begin().await.unwrap();
        tx.open_room(&room).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_room(&room.id).await.unwrap(), Some(room));
    }

    #[rocket::async_test]
    async fn reopening_keeps_the_original_room() {
        let store = MemoryStore::new();
        let room = room();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.open_room(&room).await.unwrap());
        let later = Room::new(room.student_id, room.tutor_id, Utc::now() + chrono::Duration::hours(1));
        assert!(!tx.open_room(&later).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.get_room(&room.id).await.unwrap(), Some(room));
    }

    #[rocket::async_test]
    async fn deleting_a_room_drops_its_messages() {
        let store = MemoryStore::new();
        let room = room();
        let mut tx = store.begin().await.unwrap();
        tx.open_room(&room).await.unwrap();
        assert!(tx.insert_message(&message(&room, "hello")).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.messages(&room.id).await.unwrap().len(), 1);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.delete_room(&room.id).await.unwrap());
        tx.commit().await.unwrap();

        assert!(store.messages(&room.id).await.unwrap().is_empty());
        assert!(store
            .get_room(&room_id(room.student_id, room.tutor_id))
            .await
            .unwrap()
            .is_none());
    }

    #[rocket::async_test]
    async fn messages_need_a_live_room() {
        let store = MemoryStore::new();
        let room = room();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.insert_message(&message(&room, "anyone?")).await.unwrap());
        tx.commit().await.unwrap();

        assert!(store.messages(&room.id).await.unwrap().is_empty());
    }
}
