use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub static ROOM_COLLECTION_NAME: &str = "rooms";
pub static MESSAGE_COLLECTION_NAME: &str = "messages";

/// Deterministic, order independent id of the room shared by two users.
pub fn room_id(a: Uuid, b: Uuid) -> String {
    let (a, b) = (a.to_string(), b.to_string());
    if a <= b {
        format!("{}-{}", a, b)
    } else {
        format!("{}-{}", b, a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student_id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub tutor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(student_id: Uuid, tutor_id: Uuid, created_at: DateTime<Utc>) -> Room {
        Room {
            id: room_id(student_id, tutor_id),
            student_id,
            tutor_id,
            created_at,
        }
    }

    pub fn participants(&self) -> [Uuid; 2] {
        [self.student_id, self.tutor_id]
    }

    pub fn has_participant(&self, user: Uuid) -> bool {
        self.student_id == user || self.tutor_id == user
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub room_id: String,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessageData {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoomResponse {
    pub id: String,
    pub student_id: Uuid,
    pub tutor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<Room> for RoomResponse {
    fn from(room: Room) -> Self {
        RoomResponse {
            id: room.id,
            student_id: room.student_id,
            tutor_id: room.tutor_id,
            created_at: room.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: Uuid,
    pub room_id: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        MessageResponse {
            id: m.id,
            room_id: m.room_id,
            sender_id: m.sender_id,
            sender_name: m.sender_name,
            text: m.text,
            sent_at: m.sent_at,
        }
    }
}
