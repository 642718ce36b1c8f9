use crate::{
    auth, email,
    error::{AppError, AppResult},
    models::User,
    schema::*,
    DbPool,
};
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use diesel::{update, ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use nanoid::nanoid;
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

// outstanding reset links, keyed by the emailed uid
struct Resets(HashMap<String, (Instant, i32)>);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewPasswordRequest {
    password: String,
}

// 1 hour
const RESET_ALLOWED_TIME: Duration = Duration::from_secs(60 * 60);

async fn password_request(
    Extension(pool): Extension<DbPool>,
    Extension(resets): Extension<Arc<Mutex<Resets>>>,
    Json(req): Json<ResetRequest>,
) -> AppResult<()> {
    let conn = &mut pool.get().await?;

    let Some(user) = users::table
        .filter(users::email.eq(req.email.to_lowercase()))
        .first::<User>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(
            StatusCode::NOT_FOUND,
            "could not find a matching account",
        ));
    };

    let uid = nanoid!();
    let message = email::password_reset_message(
        &user.name,
        &user.email,
        &uid,
        RESET_ALLOWED_TIME.as_secs() / 60,
    )?;

    match email::send(message).await {
        Ok(_) => {
            let mut resets = resets.lock().await;
            resets.0.insert(uid, (Instant::now(), user.id));
            Ok(())
        }
        Err(_) => Err(AppError::status(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to send email",
        )),
    }
}

async fn password_reset(
    Extension(pool): Extension<DbPool>,
    Extension(resets): Extension<Arc<Mutex<Resets>>>,
    Path(uid): Path<String>,
    Json(req): Json<NewPasswordRequest>,
) -> AppResult<()> {
    let mut resets = resets.lock().await;

    let Some((instant, user_id)) = resets.0.get(&uid) else {
        return Err(AppError::status(
            StatusCode::UNAUTHORIZED,
            "invalid password reset url",
        ));
    };
    let user_id = *user_id;

    if instant.elapsed() > RESET_ALLOWED_TIME {
        resets.0.remove(&uid);
        return Err(AppError::status(
            StatusCode::UNAUTHORIZED,
            "password reset expired",
        ));
    }

    let conn = &mut pool.get().await?;

    update(users::table.find(user_id))
        .set(users::password_hash.eq(auth::hash_password(req.password)?))
        .execute(conn)
        .await?;

    resets.0.remove(&uid);

    Ok(())
}

async fn check_uid(
    Extension(resets): Extension<Arc<Mutex<Resets>>>,
    Path(uid): Path<String>,
) -> AppResult<()> {
    resets.lock().await.0.get(&uid).map_or(
        Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "invalid password reset url",
        )),
        |_| Ok(()),
    )
}

pub fn app() -> Router {
    let shared_resets = Arc::new(Mutex::new(Resets(HashMap::new())));

    Router::new()
        .route("/reset", post(password_request))
        .route("/:uid", post(password_reset))
        .route("/:uid", get(check_uid))
        .layer(Extension(shared_resets))
}
