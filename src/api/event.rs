use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    membership::Roster,
    models::Event,
    schema::*,
    DbPool,
};
use axum::{extract::Path, http::StatusCode, Extension, Json};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventRequest {
    title: String,
    description: String,
    links: Option<String>,
    location: Option<String>,
    date: NaiveDate,
    time: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventResponse {
    id: i32,
    community_id: i32,
    title: String,
    description: String,
    links: Option<String>,
    location: Option<String>,
    date: NaiveDate,
    time: String,
    creator_name: String,
    created_at: NaiveDateTime,
}

impl EventResponse {
    fn from_event(event: Event, creator_name: String) -> Self {
        Self {
            id: event.id,
            community_id: event.community_id,
            title: event.title,
            description: event.description,
            links: event.links,
            location: event.location,
            date: event.date,
            time: event.time,
            creator_name,
            created_at: event.created_at,
        }
    }
}

pub async fn create_event(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<EventRequest>,
) -> AppResult<(StatusCode, Json<EventResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = events)]
    struct NewEvent {
        community_id: i32,
        creator_id: i32,
        title: String,
        description: String,
        links: Option<String>,
        location: Option<String>,
        date: NaiveDate,
        time: String,
        created_at: NaiveDateTime,
    }

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Not authorized to create events in this community",
        ));
    }

    let event = diesel::insert_into(events::table)
        .values(NewEvent {
            community_id,
            creator_id: caller.id,
            title: req.title,
            description: req.description,
            links: req.links,
            location: req.location,
            date: req.date,
            time: req.time,
            created_at: chrono::Utc::now().naive_utc(),
        })
        .get_result::<Event>(conn)
        .await?;

    let creator_name = users::table
        .find(caller.id)
        .select(users::name)
        .first::<String>(conn)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(EventResponse::from_event(event, creator_name)),
    ))
}

pub async fn list_events(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<Vec<EventResponse>>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Not authorized to view events in this community",
        ));
    }

    let events = events::table
        .inner_join(users::table)
        .filter(events::community_id.eq(community_id))
        .order(events::date.asc())
        .select((events::all_columns, users::name))
        .load::<(Event, String)>(conn)
        .await?;

    Ok(Json(
        events
            .into_iter()
            .map(|(event, name)| EventResponse::from_event(event, name))
            .collect(),
    ))
}
