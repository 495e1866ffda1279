//! Document store seam.
//!
//! Everything the application persists goes through [`Store`]. Multi-document
//! changes that must land together (booking, completing and cancelling
//! sessions) run inside a [`Transaction`]: reads see the transaction's own
//! writes, and nothing is visible to others until [`Transaction::commit`].
//! Dropping a transaction without committing discards it.
//!
//! Backends with snapshot isolation only abort on write-write collisions, so
//! a transaction whose decision rests on a document it only read must also
//! write that document. That's what [`Transaction::touch_user`],
//! [`Transaction::open_room`] and [`Transaction::insert_message`] are for.

use uuid::Uuid;

use crate::data::moderation::{BanRecord, Report};
use crate::data::review::Review;
use crate::data::room::{Message, Room};
use crate::data::session::{Session, SessionStatus};
use crate::data::user::User;
use crate::error::StoreError;
use crate::role::Role;

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Equality query over the sessions collection. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionQuery {
    pub tutor_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub statuses: Vec<SessionStatus>,
}

impl SessionQuery {
    pub fn tutor(id: Uuid) -> SessionQuery {
        SessionQuery {
            tutor_id: Some(id),
            ..Default::default()
        }
    }

    pub fn student(id: Uuid) -> SessionQuery {
        SessionQuery {
            student_id: Some(id),
            ..Default::default()
        }
    }

    /// Sessions booked between one student and one tutor.
    pub fn pair(student_id: Uuid, tutor_id: Uuid) -> SessionQuery {
        SessionQuery {
            tutor_id: Some(tutor_id),
            student_id: Some(student_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: SessionStatus) -> SessionQuery {
        self.statuses.push(status);
        self
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.tutor_id.map_or(true, |id| session.tutor_id == id)
            && self
                .student_id
                .map_or(true, |id| session.student_id() == Some(id))
            && (self.statuses.is_empty() || self.statuses.contains(&session.status))
    }
}

#[allow(async_fn_in_trait)]
pub trait Transaction: Send {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// Writes the user's document without changing any of its fields.
    async fn touch_user(&mut self, id: Uuid) -> Result<(), StoreError>;

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError>;
    async fn sessions(&mut self, query: &SessionQuery) -> Result<Vec<Session>, StoreError>;
    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError>;
    /// Replaces the stored session only while its status is still `expected`.
    async fn swap_session(
        &mut self,
        session: &Session,
        expected: SessionStatus,
    ) -> Result<bool, StoreError>;
    /// Deletes the session only while its status is still `expected`.
    async fn delete_session(
        &mut self,
        id: Uuid,
        expected: SessionStatus,
    ) -> Result<bool, StoreError>;

    async fn room(&mut self, id: &str) -> Result<Option<Room>, StoreError>;
    /// Creates the room, or writes the existing one. Returns whether it was
    /// created.
    async fn open_room(&mut self, room: &Room) -> Result<bool, StoreError>;
    /// Deletes the room together with its messages.
    async fn delete_room(&mut self, id: &str) -> Result<bool, StoreError>;
    /// Stores the message while its room exists, writing the room as well.
    /// Returns `false` if the room is gone.
    async fn insert_message(&mut self, message: &Message) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

#[allow(async_fn_in_trait)]
pub trait Store: Send + Sync {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn replace_user(&self, user: &User) -> Result<bool, StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError>;
    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;
    async fn find_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError>;

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError>;
    async fn rooms_of(&self, user: Uuid) -> Result<Vec<Room>, StoreError>;
    /// Messages of a room, oldest first.
    async fn messages(&self, room: &str) -> Result<Vec<Message>, StoreError>;

    async fn insert_report(&self, report: &Report) -> Result<(), StoreError>;
    async fn reports(&self) -> Result<Vec<Report>, StoreError>;

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError>;
    async fn find_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError>;
    async fn find_ban_by_email(&self, email: &str) -> Result<Option<BanRecord>, StoreError>;
    async fn delete_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError>;
    async fn bans(&self) -> Result<Vec<BanRecord>, StoreError>;

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError>;
    async fn reviews_of(&self, tutor: Uuid) -> Result<Vec<Review>, StoreError>;
}

/// Store selected by configuration.
#[derive(Debug, Clone)]
pub enum Storage {
    Mongo(MongoStore),
    Memory(MemoryStore),
}

pub enum StorageTx {
    Mongo(mongo::MongoTx),
    Memory(memory::MemoryTx),
}

macro_rules! dispatch {
    ($target:expr, $enum:ident, $inner:ident => $call:expr) => {
        match $target {
            $enum::Mongo($inner) => $call,
            $enum::Memory($inner) => $call,
        }
    };
}

impl Transaction for StorageTx {
    async fn user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        dispatch!(self, StorageTx, tx => tx.user(id).await)
    }

    async fn touch_user(&mut self, id: Uuid) -> Result<(), StoreError> {
        dispatch!(self, StorageTx, tx => tx.touch_user(id).await)
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>, StoreError> {
        dispatch!(self, StorageTx, tx => tx.session(id).await)
    }

    async fn sessions(&mut self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        dispatch!(self, StorageTx, tx => tx.sessions(query).await)
    }

    async fn insert_session(&mut self, session: &Session) -> Result<(), StoreError> {
        dispatch!(self, StorageTx, tx => tx.insert_session(session).await)
    }

    async fn swap_session(
        &mut self,
        session: &Session,
        expected: SessionStatus,
    ) -> Result<bool, StoreError> {
        dispatch!(self, StorageTx, tx => tx.swap_session(session, expected).await)
    }

    async fn delete_session(
        &mut self,
        id: Uuid,
        expected: SessionStatus,
    ) -> Result<bool, StoreError> {
        dispatch!(self, StorageTx, tx => tx.delete_session(id, expected).await)
    }

    async fn room(&mut self, id: &str) -> Result<Option<Room>, StoreError> {
        dispatch!(self, StorageTx, tx => tx.room(id).await)
    }

    async fn open_room(&mut self, room: &Room) -> Result<bool, StoreError> {
        dispatch!(self, StorageTx, tx => tx.open_room(room).await)
    }

    async fn delete_room(&mut self, id: &str) -> Result<bool, StoreError> {
        dispatch!(self, StorageTx, tx => tx.delete_room(id).await)
    }

    async fn insert_message(&mut self, message: &Message) -> Result<bool, StoreError> {
        dispatch!(self, StorageTx, tx => tx.insert_message(message).await)
    }

    async fn commit(self) -> Result<(), StoreError> {
        dispatch!(self, StorageTx, tx => tx.commit().await)
    }
}

impl Store for Storage {
    type Tx = StorageTx;

    async fn begin(&self) -> Result<StorageTx, StoreError> {
        match self {
            Storage::Mongo(s) => s.begin().await.map(StorageTx::Mongo),
            Storage::Memory(s) => s.begin().await.map(StorageTx::Memory),
        }
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        dispatch!(self, Storage, s => s.insert_user(user).await)
    }

    async fn replace_user(&self, user: &User) -> Result<bool, StoreError> {
        dispatch!(self, Storage, s => s.replace_user(user).await)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        dispatch!(self, Storage, s => s.get_user(id).await)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        dispatch!(self, Storage, s => s.find_user_by_email(email).await)
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, StoreError> {
        dispatch!(self, Storage, s => s.list_users(role).await)
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        dispatch!(self, Storage, s => s.delete_user(id).await)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        dispatch!(self, Storage, s => s.get_session(id).await)
    }

    async fn find_sessions(&self, query: &SessionQuery) -> Result<Vec<Session>, StoreError> {
        dispatch!(self, Storage, s => s.find_sessions(query).await)
    }

    async fn get_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        dispatch!(self, Storage, s => s.get_room(id).await)
    }

    async fn rooms_of(&self, user: Uuid) -> Result<Vec<Room>, StoreError> {
        dispatch!(self, Storage, s => s.rooms_of(user).await)
    }

    async fn messages(&self, room: &str) -> Result<Vec<Message>, StoreError> {
        dispatch!(self, Storage, s => s.messages(room).await)
    }

    async fn insert_report(&self, report: &Report) -> Result<(), StoreError> {
        dispatch!(self, Storage, s => s.insert_report(report).await)
    }

    async fn reports(&self) -> Result<Vec<Report>, StoreError> {
        dispatch!(self, Storage, s => s.reports().await)
    }

    async fn insert_ban(&self, ban: &BanRecord) -> Result<(), StoreError> {
        dispatch!(self, Storage, s => s.insert_ban(ban).await)
    }

    async fn find_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError> {
        dispatch!(self, Storage, s => s.find_ban(tutor).await)
    }

    async fn find_ban_by_email(&self, email: &str) -> Result<Option<BanRecord>, StoreError> {
        dispatch!(self, Storage, s => s.find_ban_by_email(email).await)
    }

    async fn delete_ban(&self, tutor: Uuid) -> Result<Option<BanRecord>, StoreError> {
        dispatch!(self, Storage, s => s.delete_ban(tutor).await)
    }

    async fn bans(&self) -> Result<Vec<BanRecord>, StoreError> {
        dispatch!(self, Storage, s => s.bans().await)
    }

    async fn insert_review(&self, review: &Review) -> Result<(), StoreError> {
        dispatch!(self, Storage, s => s.insert_review(review).await)
    }

    async fn reviews_of(&self, tutor: Uuid) -> Result<Vec<Review>, StoreError> {
        dispatch!(self, Storage, s => s.reviews_of(tutor).await)
    }
}
