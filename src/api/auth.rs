use crate::{
    auth::{self, ExtractAuth},
    email,
    error::{AppError, AppResult},
    models::{Role, User},
    schema::*,
    DbPool,
};
use axum::{
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserSummary {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl UserSummary {
    fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizedResponse {
    pub token: String,
    pub user: UserSummary,
}

impl AuthorizedResponse {
    fn from_user(user: &User) -> anyhow::Result<AuthorizedResponse> {
        Ok(AuthorizedResponse {
            // expires after one day
            token: auth::generate_jwt(user.id, user.role, Duration::from_secs(24 * 60 * 60))?,
            user: UserSummary::from_user(user),
        })
    }
}

async fn register(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthorizedResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = users)]
    struct NewUser {
        name: String,
        email: String,
        password_hash: String,
        role: Role,
        created_at: NaiveDateTime,
    }

    let conn = &mut pool.get().await?;

    let new_user = diesel::insert_into(users::table)
        .values(NewUser {
            name: req.name,
            email: req.email.to_lowercase(),
            password_hash: auth::hash_password(req.password)?,
            role: req.role.unwrap_or(Role::Student),
            created_at: chrono::Utc::now().naive_utc(),
        })
        .on_conflict(users::email)
        .do_nothing()
        .get_result::<User>(conn)
        .await
        .optional()?;

    let Some(new_user) = new_user else {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "User already exists",
        ));
    };

    // welcome email is fire-and-forget; registration succeeds either way
    let (name, address) = (new_user.name.clone(), new_user.email.clone());
    tokio::spawn(async move {
        match email::welcome_message(&name, &address) {
            Ok(msg) => {
                if let Err(e) = email::send(msg).await {
                    tracing::warn!("failed to send welcome email to {address}: {e:#}");
                }
            }
            Err(e) => tracing::warn!("failed to build welcome email for {address}: {e:#}"),
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(AuthorizedResponse::from_user(&new_user)?),
    ))
}

async fn login(
    Extension(pool): Extension<DbPool>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthorizedResponse>> {
    let conn = &mut pool.get().await?;

    if let Some(user) = users::table
        .filter(users::email.eq(req.email.to_lowercase()))
        .first::<User>(conn)
        .await
        .optional()?
    {
        if auth::verify_password(req.password, &user.password_hash)? {
            return Ok(Json(AuthorizedResponse::from_user(&user)?));
        }
    }
    Err(AppError::status(
        StatusCode::UNAUTHORIZED,
        "invalid email or password",
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommunityRef {
    pub id: i32,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    #[serde(flatten)]
    pub user: UserSummary,
    pub communities: Vec<CommunityRef>,
}

async fn me(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<MeResponse>> {
    let conn = &mut pool.get().await?;

    let user = users::table
        .find(caller.id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "user not found"))?;

    let administered = communities::table
        .filter(communities::admin_id.eq(user.id))
        .select((communities::id, communities::name))
        .load::<(i32, String)>(conn)
        .await?;

    let joined = community_members::table
        .inner_join(communities::table)
        .filter(community_members::user_id.eq(user.id))
        .select((communities::id, communities::name))
        .load::<(i32, String)>(conn)
        .await?;

    let communities = administered
        .into_iter()
        .chain(joined)
        .unique_by(|(id, _)| *id)
        .map(|(id, name)| CommunityRef { id, name })
        .collect();

    Ok(Json(MeResponse {
        user: UserSummary::from_user(&user),
        communities,
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}
