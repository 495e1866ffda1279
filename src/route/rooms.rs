use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use super::current_user;
use crate::data::room::{Message, MessageData, MessageResponse, Room, RoomResponse};
use crate::error::ValidationError;
use crate::feed::Event;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::store::{Store, Transaction};
use crate::Backend;

fn room_not_found(id: &str) -> Problem {
    Problem::new_untyped(Status::NotFound, "Room doesn't exist.")
        .insert_str("id", id)
        .clone()
}

/// Room `id` if `user` takes part in it.
fn joined(room: Option<Room>, id: &str, user: Uuid) -> Result<Room, Problem> {
    match room {
        Some(room) if room.has_participant(user) => Ok(room),
        Some(_) => Err(Problem::new_untyped(
            Status::Forbidden,
            "Only participants can access a room.",
        )),
        None => Err(room_not_found(id)),
    }
}

/// Chat rooms the caller takes part in
#[utoipa::path(responses((status = 200, description = "Caller's rooms", body = Vec<RoomResponse>)))]
#[get("/rooms")]
#[tracing::instrument(skip(backend))]
pub async fn room_list(
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<Vec<RoomResponse>>, Problem> {
    let rooms = backend.store().rooms_of(auth.user).await?;
    Ok(Json(rooms.into_iter().map(Into::into).collect()))
}

/// Messages of a room, oldest first
#[utoipa::path(
    responses(
        (status = 200, description = "Messages in send order", body = Vec<MessageResponse>),
        (status = 403, description = "Caller isn't a participant", body = Problem),
        (status = 404, description = "No such room", body = Problem),
    )
)]
#[get("/rooms/<id>/messages")]
#[tracing::instrument(skip(backend))]
pub async fn message_list(
    id: &str,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<Vec<MessageResponse>>, Problem> {
    let room = joined(backend.store().get_room(id).await?, id, auth.user)?;
    let messages = backend.store().messages(&room.id).await?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

/// Send a message to an open room
#[utoipa::path(
    request_body = MessageData,
    responses(
        (status = 200, description = "Stored message", body = MessageResponse),
        (status = 400, description = "Empty message", body = Problem),
        (status = 403, description = "Caller isn't a participant", body = Problem),
        (status = 404, description = "No such room", body = Problem),
    )
)]
#[post("/rooms/<id>/messages", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(backend, data))]
pub async fn message_send(
    id: &str,
    data: Json<MessageData>,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<MessageResponse>, Problem> {
    let text = data.text.trim();
    if text.is_empty() {
        return Err(ValidationError::Empty("message").into());
    }

    let sender = current_user(backend, &auth).await?;

    // The room may close concurrently, so the check and the insert share a
    // transaction.
    let mut tx = backend.store().begin().await?;
    let room = joined(tx.room(id).await?, id, auth.user)?;
    let message = Message {
        id: Uuid::new_v4(),
        room_id: room.id.clone(),
        sender_id: sender.id,
        sender_name: sender.name,
        text: text.to_string(),
        sent_at: Utc::now(),
    };
    if !tx.insert_message(&message).await? {
        return Err(room_not_found(id));
    }
    tx.commit().await?;
    tracing::debug!("user {} wrote to room {}", message.sender_id, room.id);

    let response = MessageResponse::from(message);
    backend.feed().publish(Event::Message {
        message: response.clone(),
        participants: room.participants(),
    });
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};

    use super::*;
    use crate::data::room::room_id;
    use crate::role::Role;
    use crate::testing;

    #[rocket::async_test]
    async fn v1_participants_chat_in_order() {
        let client = testing::client().await;
        let (tutor, tutor_cookie) = testing::sign_in(&client, Role::Tutor).await;
        let (student, student_cookie) = testing::sign_in(&client, Role::Student).await;
        let room = Room::new(student.id, tutor.id, Utc::now());
        let mut tx = testing::backend(&client).store().begin().await.unwrap();
        tx.open_room(&room).await.unwrap();
        tx.commit().await.unwrap();

        let uri = format!("/api/v1/rooms/{}/messages", room_id(tutor.id, student.id));
        for (cookie, text) in [(&student_cookie, "hello"), (&tutor_cookie, "hi there")] {
            let response = client
                .post(&uri)
                .header(ContentType::JSON)
                .cookie(cookie.clone())
                .body(format!(r#"{{"text": "{}"}}"#, text))
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Ok);
        }

        let messages: Vec<MessageResponse> = client
            .get(&uri)
            .cookie(tutor_cookie)
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "hi there"]);

        let rooms: Vec<RoomResponse> = client
            .get("/api/v1/rooms")
            .cookie(student_cookie)
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(rooms.len(), 1);
    }

    #[rocket::async_test]
    async fn v1_closed_room_takes_no_messages() {
        let client = testing::client().await;
        let (tutor, _) = testing::sign_in(&client, Role::Tutor).await;
        let (student, cookie) = testing::sign_in(&client, Role::Student).await;
        let room = Room::new(student.id, tutor.id, Utc::now());
        let store = testing::backend(&client).store();
        let mut tx = store.begin().await.unwrap();
        tx.open_room(&room).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete_room(&room.id).await.unwrap();
        tx.commit().await.unwrap();

        let response = client
            .post(format!("/api/v1/rooms/{}/messages", room.id))
            .header(ContentType::JSON)
            .cookie(cookie)
            .body(r#"{"text": "late reply"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        // Reopening the pair's room starts with an empty history.
        let mut tx = store.begin().await.unwrap();
        tx.open_room(&room).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.messages(&room.id).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn v1_outsiders_cannot_write() {
        let client = testing::client().await;
        let (tutor, _) = testing::sign_in(&client, Role::Tutor).await;
        let (student, _) = testing::sign_in(&client, Role::Student).await;
        let (_, outsider) = testing::sign_in(&client, Role::Student).await;
        let room = Room::new(student.id, tutor.id, Utc::now());
        let mut tx = testing::backend(&client).store().begin().await.unwrap();
        tx.open_room(&room).await.unwrap();
        tx.commit().await.unwrap();

        let response = client
            .post(format!("/api/v1/rooms/{}/messages", room.id))
            .header(ContentType::JSON)
            .cookie(outsider)
            .body(r#"{"text": "hi"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
        assert!(testing::backend(&client)
            .store()
            .messages(&room.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[rocket::async_test]
    async fn v1_messages_need_an_open_room() {
        let client = testing::client().await;
        let (tutor, _) = testing::sign_in(&client, Role::Tutor).await;
        let (student, cookie) = testing::sign_in(&client, Role::Student).await;

        let response = client
            .post(format!("/api/v1/rooms/{}/messages", room_id(student.id, tutor.id)))
            .header(ContentType::JSON)
            .cookie(cookie.clone())
            .body(r#"{"text": "anyone?"}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let response = client
            .post(format!("/api/v1/rooms/{}/messages", room_id(student.id, tutor.id)))
            .header(ContentType::JSON)
            .cookie(cookie)
            .body(r#"{"text": "   "}"#)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }
}
