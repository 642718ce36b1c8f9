use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    llm,
    membership::{can_view_blog, Membership, Roster},
    moderation,
    models::{Blog, BlogStatus, Role},
    schema::*,
    DbPool,
};
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::NaiveDateTime;
use diesel::{dsl::sql, prelude::*, sql_types::Bool, sql_types::Text};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlogResponse {
    id: i32,
    community_id: i32,
    title: String,
    content: String,
    author_id: i32,
    author_name: String,
    author_role: Role,
    is_original_content: bool,
    real_author_name: Option<String>,
    source_url: Option<String>,
    status: BlogStatus,
    reviewer_name: Option<String>,
    review_comment: Option<String>,
    reviewed_at: Option<NaiveDateTime>,
    tags: Vec<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl BlogResponse {
    fn from_blog(blog: Blog, author_name: String, reviewer_name: Option<String>) -> Self {
        Self {
            id: blog.id,
            community_id: blog.community_id,
            title: blog.title,
            content: blog.content,
            author_id: blog.author_id,
            author_name,
            author_role: blog.author_role,
            is_original_content: blog.is_original_content,
            real_author_name: blog.real_author_name,
            source_url: blog.source_url,
            status: blog.status,
            reviewer_name,
            review_comment: blog.review_comment,
            reviewed_at: blog.reviewed_at,
            tags: blog.tags,
            created_at: blog.created_at,
            updated_at: blog.updated_at,
        }
    }
}

/// Resolves reviewer names for a page of blogs in one lookup.
async fn load_blogs(
    conn: &mut AsyncPgConnection,
    blogs: Vec<(Blog, String)>,
) -> AppResult<Vec<BlogResponse>> {
    let reviewer_ids: Vec<i32> = blogs
        .iter()
        .filter_map(|(blog, _)| blog.reviewed_by)
        .unique()
        .collect();

    let reviewers: HashMap<i32, String> = users::table
        .filter(users::id.eq_any(&reviewer_ids))
        .select((users::id, users::name))
        .load::<(i32, String)>(conn)
        .await?
        .into_iter()
        .collect();

    Ok(blogs
        .into_iter()
        .map(|(blog, author_name)| {
            let reviewer_name = blog.reviewed_by.and_then(|id| reviewers.get(&id).cloned());
            BlogResponse::from_blog(blog, author_name, reviewer_name)
        })
        .collect())
}

async fn load_blog(conn: &mut AsyncPgConnection, blog: Blog) -> AppResult<BlogResponse> {
    let author_name = users::table
        .find(blog.author_id)
        .select(users::name)
        .first::<String>(conn)
        .await?;
    load_blogs(conn, vec![(blog, author_name)])
        .await?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("`load_blogs` should return one blog").into())
}

fn validate_attribution(
    is_original: bool,
    real_author_name: &Option<String>,
    source_url: &Option<String>,
) -> AppResult<()> {
    if is_original {
        return Ok(());
    }
    let name_missing = real_author_name
        .as_deref()
        .map_or(true, |n| n.trim().is_empty());
    if name_missing {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Real author name is required for non-original content",
        ));
    }
    match source_url.as_deref() {
        Some(raw) if !raw.trim().is_empty() => {
            url::Url::parse(raw).map_err(|_| {
                AppError::status(StatusCode::BAD_REQUEST, "Source url is not a valid url")
            })?;
            Ok(())
        }
        _ => Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Source url is required for non-original content",
        )),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBlogRequest {
    title: String,
    content: String,
    community_id: i32,
    #[serde(default = "default_original")]
    is_original_content: bool,
    real_author_name: Option<String>,
    source_url: Option<String>,
    tags: Option<String>,
}

fn default_original() -> bool {
    true
}

async fn create_blog(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<CreateBlogRequest>,
) -> AppResult<(StatusCode, Json<BlogResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = blogs)]
    struct NewBlog {
        community_id: i32,
        author_id: i32,
        author_role: Role,
        title: String,
        content: String,
        is_original_content: bool,
        real_author_name: Option<String>,
        source_url: Option<String>,
        status: BlogStatus,
        tags: Vec<String>,
        created_at: NaiveDateTime,
        updated_at: NaiveDateTime,
    }

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, req.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community",
        ));
    }

    validate_attribution(
        req.is_original_content,
        &req.real_author_name,
        &req.source_url,
    )?;

    let now = chrono::Utc::now().naive_utc();
    let blog = diesel::insert_into(blogs::table)
        .values(NewBlog {
            community_id: req.community_id,
            author_id: caller.id,
            author_role: caller.role,
            title: req.title,
            content: req.content,
            is_original_content: req.is_original_content,
            real_author_name: req
                .real_author_name
                .filter(|_| !req.is_original_content),
            source_url: req.source_url.filter(|_| !req.is_original_content),
            status: moderation::initial_status(caller.role),
            tags: req.tags.as_deref().map(super::parse_tags).unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
        .get_result::<Blog>(conn)
        .await?;

    Ok((StatusCode::CREATED, Json(load_blog(conn, blog).await?)))
}

async fn list_blogs(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<Vec<BlogResponse>>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    let membership = roster.resolve(caller.id);
    if !membership.is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community",
        ));
    }

    let mut query = blogs::table
        .inner_join(users::table.on(users::id.eq(blogs::author_id)))
        .select((blogs::all_columns, users::name))
        .filter(blogs::community_id.eq(community_id))
        .into_boxed();

    // the read-side view of the moderation lifecycle; mirrors can_view_blog
    match membership {
        Membership::Admin => {}
        Membership::Teacher => {
            query = query.filter(
                blogs::status
                    .eq(BlogStatus::Approved)
                    .or(blogs::author_id.eq(caller.id))
                    .or(blogs::status
                        .eq(BlogStatus::Pending)
                        .and(blogs::author_role.eq(Role::Student))),
            )
        }
        _ => {
            query = query.filter(
                blogs::status
                    .eq(BlogStatus::Approved)
                    .or(blogs::author_id.eq(caller.id)),
            )
        }
    }

    let blogs = query
        .order(blogs::created_at.desc())
        .load::<(Blog, String)>(conn)
        .await?;

    Ok(Json(load_blogs(conn, blogs).await?))
}

async fn get_blog(
    Extension(pool): Extension<DbPool>,
    Path(blog_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<BlogResponse>> {
    let conn = &mut pool.get().await?;

    let Some(blog) = blogs::table
        .find(blog_id)
        .first::<Blog>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Blog not found"));
    };

    let roster = Roster::load(conn, blog.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    let membership = roster.resolve(caller.id);
    if !can_view_blog(
        membership,
        caller.id,
        blog.author_id,
        blog.author_role,
        blog.status,
    ) {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You do not have permission to view this blog post",
        ));
    }

    Ok(Json(load_blog(conn, blog).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBlogRequest {
    title: Option<String>,
    content: Option<String>,
    is_original_content: Option<bool>,
    real_author_name: Option<String>,
    source_url: Option<String>,
    tags: Option<String>,
}

async fn update_blog(
    Extension(pool): Extension<DbPool>,
    Path(blog_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<UpdateBlogRequest>,
) -> AppResult<Json<BlogResponse>> {
    let conn = &mut pool.get().await?;

    let Some(blog) = blogs::table
        .find(blog_id)
        .first::<Blog>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Blog not found"));
    };

    if blog.author_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not authorized to update this blog post",
        ));
    }

    let title = req.title.unwrap_or_else(|| blog.title.clone());
    let content = req.content.unwrap_or_else(|| blog.content.clone());
    let is_original = req.is_original_content.unwrap_or(blog.is_original_content);
    let (real_author_name, source_url) = if is_original {
        (None, None)
    } else {
        (
            req.real_author_name.or_else(|| blog.real_author_name.clone()),
            req.source_url.or_else(|| blog.source_url.clone()),
        )
    };
    validate_attribution(is_original, &real_author_name, &source_url)?;

    let tags = req
        .tags
        .as_deref()
        .map(super::parse_tags)
        .unwrap_or_else(|| blog.tags.clone());

    // only title/content edits force a fresh review
    let outcome = moderation::after_edit(
        blog.status,
        title != blog.title,
        content != blog.content,
    );

    let (reviewed_by, review_comment, reviewed_at) = if outcome.clear_review {
        (None, None, None)
    } else {
        (blog.reviewed_by, blog.review_comment.clone(), blog.reviewed_at)
    };

    let updated = diesel::update(blogs::table.find(blog_id))
        .set((
            blogs::title.eq(title),
            blogs::content.eq(content),
            blogs::is_original_content.eq(is_original),
            blogs::real_author_name.eq(real_author_name),
            blogs::source_url.eq(source_url),
            blogs::status.eq(outcome.status),
            blogs::reviewed_by.eq(reviewed_by),
            blogs::review_comment.eq(review_comment),
            blogs::reviewed_at.eq(reviewed_at),
            blogs::tags.eq(tags),
            blogs::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .get_result::<Blog>(conn)
        .await?;

    Ok(Json(load_blog(conn, updated).await?))
}

async fn delete_blog(
    Extension(pool): Extension<DbPool>,
    Path(blog_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<serde_json::Value>> {
    let conn = &mut pool.get().await?;

    let Some(blog) = blogs::table
        .find(blog_id)
        .first::<Blog>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Blog not found"));
    };

    if blog.author_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not authorized to delete this blog post",
        ));
    }

    diesel::delete(blogs::table.find(blog_id))
        .execute(conn)
        .await?;

    Ok(Json(serde_json::json!({
        "message": "Blog post deleted successfully"
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    status: BlogStatus,
    review_comment: Option<String>,
}

async fn review_blog(
    Extension(pool): Extension<DbPool>,
    Path(blog_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<ReviewRequest>,
) -> AppResult<Json<BlogResponse>> {
    let conn = &mut pool.get().await?;

    let Some(blog) = blogs::table
        .find(blog_id)
        .first::<Blog>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Blog not found"));
    };

    let roster = Roster::load(conn, blog.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    let membership = roster.resolve(caller.id);
    if !membership.can_review(blog.author_role) {
        let message = if blog.author_role == Role::Teacher && membership == Membership::Teacher {
            "Only admins can review teacher blog posts"
        } else {
            "You are not authorized to review this blog post"
        };
        return Err(AppError::status(StatusCode::FORBIDDEN, message));
    }

    let review_comment = moderation::normalize_comment(req.review_comment.as_deref());
    let verdict = moderation::review(blog.status, req.status, review_comment.as_deref())
        .map_err(|e| AppError::status(StatusCode::BAD_REQUEST, e.to_string()))?;

    let updated = diesel::update(blogs::table.find(blog_id))
        .set((
            blogs::status.eq(verdict),
            blogs::reviewed_by.eq(Some(caller.id)),
            blogs::review_comment.eq(review_comment),
            blogs::reviewed_at.eq(Some(chrono::Utc::now().naive_utc())),
        ))
        .get_result::<Blog>(conn)
        .await?;

    Ok(Json(load_blog(conn, updated).await?))
}

async fn resubmit_blog(
    Extension(pool): Extension<DbPool>,
    Path(blog_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<BlogResponse>> {
    let conn = &mut pool.get().await?;

    let Some(blog) = blogs::table
        .find(blog_id)
        .first::<Blog>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Blog not found"));
    };

    if blog.author_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not authorized to resubmit this blog post",
        ));
    }

    let status = moderation::resubmit(blog.status)
        .map_err(|e| AppError::status(StatusCode::BAD_REQUEST, e.to_string()))?;

    // previous rejection feedback is cleared for the fresh review
    let updated = diesel::update(blogs::table.find(blog_id))
        .set((
            blogs::status.eq(status),
            blogs::review_comment.eq(None::<String>),
            blogs::reviewed_at.eq(None::<NaiveDateTime>),
        ))
        .get_result::<Blog>(conn)
        .await?;

    Ok(Json(load_blog(conn, updated).await?))
}

async fn pending_blogs(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<Vec<BlogResponse>>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    let membership = roster.resolve(caller.id);
    if !matches!(membership, Membership::Admin | Membership::Teacher) {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not authorized to review blogs",
        ));
    }

    let mut query = blogs::table
        .inner_join(users::table.on(users::id.eq(blogs::author_id)))
        .select((blogs::all_columns, users::name))
        .filter(blogs::community_id.eq(community_id))
        .filter(blogs::status.eq(BlogStatus::Pending))
        .into_boxed();

    if membership == Membership::Teacher {
        query = query.filter(blogs::author_role.eq(Role::Student));
    }

    // review queue is first-in-first-out
    let blogs = query
        .order(blogs::created_at.asc())
        .load::<(Blog, String)>(conn)
        .await?;

    Ok(Json(load_blogs(conn, blogs).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    keyword: Option<String>,
}

async fn search_blogs(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
    Query(query_params): Query<SearchQuery>,
) -> AppResult<Json<Vec<BlogResponse>>> {
    let keyword = query_params
        .keyword
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "Keyword is required"))?;

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    let membership = roster.resolve(caller.id);
    if !membership.is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community",
        ));
    }

    let tag_match = sql::<Bool>("EXISTS (SELECT 1 FROM unnest(tags) AS tag WHERE tag ILIKE ")
        .bind::<Text, _>(format!("%{}%", keyword))
        .sql(")");

    let mut query = blogs::table
        .inner_join(users::table.on(users::id.eq(blogs::author_id)))
        .select((blogs::all_columns, users::name))
        .filter(blogs::community_id.eq(community_id))
        .filter(tag_match)
        .into_boxed();

    // same visibility predicate as the listing
    match membership {
        Membership::Admin => {}
        Membership::Teacher => {
            query = query.filter(
                blogs::status
                    .eq(BlogStatus::Approved)
                    .or(blogs::author_id.eq(caller.id))
                    .or(blogs::status
                        .eq(BlogStatus::Pending)
                        .and(blogs::author_role.eq(Role::Student))),
            )
        }
        _ => {
            query = query.filter(
                blogs::status
                    .eq(BlogStatus::Approved)
                    .or(blogs::author_id.eq(caller.id)),
            )
        }
    }

    let blogs = query
        .order(blogs::created_at.desc())
        .load::<(Blog, String)>(conn)
        .await?;

    Ok(Json(load_blogs(conn, blogs).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeRequest {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeResponse {
    summary: String,
}

async fn summarize_blog(
    ExtractAuth(_caller): ExtractAuth,
    Json(req): Json<SummarizeRequest>,
) -> AppResult<Json<SummarizeResponse>> {
    if req.content.trim().is_empty() {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Blog content is required",
        ));
    }

    let summary = llm::summarize(&req.content).await?;
    Ok(Json(SummarizeResponse { summary }))
}

pub fn app() -> Router {
    Router::new()
        .route("/", post(create_blog))
        .route("/community/:community_id", get(list_blogs))
        .route("/pending/:community_id", get(pending_blogs))
        .route("/search/:community_id", get(search_blogs))
        .route("/summarize", post(summarize_blog))
        .route("/review/:blog_id", put(review_blog))
        .route("/resubmit/:blog_id", put(resubmit_blog))
        .route("/:blog_id", get(get_blog).put(update_blog).delete(delete_blog))
}
