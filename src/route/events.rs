use rocket::futures::Stream;
use rocket::response::stream::{Event as SseEvent, EventStream};
use rocket::{Shutdown, State};

use crate::data::user::db::problem as user_problem;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::store::Store;
use crate::Backend;

/// Live stream of session and chat events concerning the caller.
///
/// The stream ends on logout, ban or server shutdown.
#[utoipa::path(
    responses(
        (status = 200, description = "Server-sent events", content_type = "text/event-stream"),
        (status = 401, description = "Not logged in"),
        (status = 403, description = "Account is banned", body = Problem),
    )
)]
#[get("/events")]
#[tracing::instrument(skip(backend, shutdown))]
pub async fn event_stream(
    auth: UserRoleToken,
    backend: &State<Backend>,
    mut shutdown: Shutdown,
) -> Result<EventStream<impl Stream<Item = SseEvent>>, Problem> {
    // Tokens outlive bans, so a banned tutor could otherwise reconnect.
    if backend.store().find_ban(auth.user).await?.is_some() {
        tracing::info!("refused event stream of banned user {}", auth.user);
        return Err(user_problem::banned());
    }

    let mut subscription = backend.feed().subscribe(auth.user);
    tracing::debug!("user {} opened an event stream", auth.user);

    Ok(EventStream! {
        loop {
            let event = tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield SseEvent::json(&event).event(event.name());
        }
    })
}

#[cfg(test)]
mod tests {
    use rocket::http::Status;

    use crate::data::moderation::BanRecord;
    use crate::role::Role;
    use crate::store::Store;
    use crate::testing;

    #[rocket::async_test]
    async fn v1_events_need_login() {
        let client = testing::client().await;
        let response = client.get("/api/v1/events").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn v1_banned_tutors_cannot_reconnect() {
        let client = testing::client().await;
        let (tutor, cookie) = testing::sign_in(&client, Role::Tutor).await;
        testing::backend(&client)
            .store()
            .insert_ban(&BanRecord::new(&tutor))
            .await
            .unwrap();

        let response = client.get("/api/v1/events").cookie(cookie).dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(testing::backend(&client).feed().subscriber_count(tutor.id), 0);
    }
}
