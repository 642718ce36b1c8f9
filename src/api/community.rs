use super::{event, material, material::MaterialResponse};
use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    membership::{self, Membership, Roster},
    models::{Community, JoinRequest, MemberRole, RequestStatus, Role, User},
    schema::*,
    DbPool,
};
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rand::Rng;
use serde::{Deserialize, Serialize};

fn generate_join_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserSummary {
    id: i32,
    name: String,
    email: String,
    role: Role,
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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommunityRequest {
    name: String,
    description: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommunityCreatedResponse {
    id: i32,
    name: String,
    description: String,
    join_code: String,
    created_at: NaiveDateTime,
}

async fn create_community(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<CreateCommunityRequest>,
) -> AppResult<(StatusCode, Json<CommunityCreatedResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = communities)]
    struct NewCommunity {
        name: String,
        description: String,
        join_code: String,
        admin_id: i32,
        created_at: NaiveDateTime,
    }

    if caller.role != Role::Admin {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Only admin can create communities",
        ));
    }

    let conn = &mut pool.get().await?;

    // the join code has a unique index; regenerate on collision
    let mut created = None;
    for _ in 0..5 {
        let inserted = diesel::insert_into(communities::table)
            .values(NewCommunity {
                name: req.name.clone(),
                description: req.description.clone(),
                join_code: generate_join_code(),
                admin_id: caller.id,
                created_at: chrono::Utc::now().naive_utc(),
            })
            .on_conflict(communities::join_code)
            .do_nothing()
            .get_result::<Community>(conn)
            .await
            .optional()?;
        if let Some(community) = inserted {
            created = Some(community);
            break;
        }
    }
    let community =
        created.ok_or_else(|| anyhow::anyhow!("failed to allocate a unique join code"))?;

    Ok((
        StatusCode::CREATED,
        Json(CommunityCreatedResponse {
            id: community.id,
            name: community.name,
            description: community.description,
            join_code: community.join_code,
            created_at: community.created_at,
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommunitySummary {
    id: i32,
    name: String,
    description: String,
    admin_name: String,
    teacher_count: i64,
    student_count: i64,
    created_at: NaiveDateTime,
}

async fn summarize(
    conn: &mut diesel_async::AsyncPgConnection,
    communities: Vec<(Community, String)>,
) -> AppResult<Vec<CommunitySummary>> {
    let ids: Vec<i32> = communities.iter().map(|(c, _)| c.id).collect();
    let members = community_members::table
        .filter(community_members::community_id.eq_any(&ids))
        .select((community_members::community_id, community_members::member_role))
        .load::<(i32, MemberRole)>(conn)
        .await?;

    Ok(communities
        .into_iter()
        .map(|(community, admin_name)| {
            let count = |role: MemberRole| {
                members
                    .iter()
                    .filter(|(id, r)| *id == community.id && *r == role)
                    .count() as i64
            };
            CommunitySummary {
                teacher_count: count(MemberRole::Teacher),
                student_count: count(MemberRole::Student),
                id: community.id,
                name: community.name,
                description: community.description,
                admin_name,
                created_at: community.created_at,
            }
        })
        .collect())
}

async fn list_communities(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(_caller): ExtractAuth,
) -> AppResult<Json<Vec<CommunitySummary>>> {
    let conn = &mut pool.get().await?;

    let communities = communities::table
        .inner_join(users::table.on(users::id.eq(communities::admin_id)))
        .select((communities::all_columns, users::name))
        .load::<(Community, String)>(conn)
        .await?;

    Ok(Json(summarize(conn, communities).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    keyword: Option<String>,
}

async fn search_communities(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(_caller): ExtractAuth,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<CommunitySummary>>> {
    let keyword = query
        .keyword
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "Keyword is required"))?;
    let pattern = format!("%{}%", keyword);

    let conn = &mut pool.get().await?;

    let communities = communities::table
        .inner_join(users::table.on(users::id.eq(communities::admin_id)))
        .filter(
            communities::name
                .ilike(pattern.clone())
                .or(communities::description.ilike(pattern)),
        )
        .select((communities::all_columns, users::name))
        .load::<(Community, String)>(conn)
        .await?;

    Ok(Json(summarize(conn, communities).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequestView {
    id: i32,
    user: UserSummary,
    status: RequestStatus,
    created_at: NaiveDateTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommunityDetail {
    id: i32,
    name: String,
    description: String,
    join_code: String,
    admin: UserSummary,
    teachers: Vec<UserSummary>,
    students: Vec<UserSummary>,
    join_requests: Vec<JoinRequestView>,
    materials: Vec<MaterialResponse>,
    created_at: NaiveDateTime,
}

async fn community_detail(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Response> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    let admin = users::table
        .find(roster.community.admin_id)
        .first::<User>(conn)
        .await?;

    let membership = roster.resolve(caller.id);
    if !membership.is_member() {
        // reduced view: basic info plus the caller's own pending requests
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct PendingRequestView {
            id: i32,
            status: RequestStatus,
            created_at: NaiveDateTime,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct CommunityBasic {
            id: i32,
            name: String,
            description: String,
            admin_name: String,
        }

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct NonMemberResponse {
            message: &'static str,
            community_basic: CommunityBasic,
            join_requests: Vec<PendingRequestView>,
        }

        let own_requests = join_requests::table
            .filter(join_requests::community_id.eq(community_id))
            .filter(join_requests::user_id.eq(caller.id))
            .filter(join_requests::status.eq(RequestStatus::Pending))
            .load::<JoinRequest>(conn)
            .await?;

        return Ok((
            StatusCode::FORBIDDEN,
            Json(NonMemberResponse {
                message: "You do not have permission to view this community.",
                community_basic: CommunityBasic {
                    id: roster.community.id,
                    name: roster.community.name,
                    description: roster.community.description,
                    admin_name: admin.name,
                },
                join_requests: own_requests
                    .into_iter()
                    .map(|r| PendingRequestView {
                        id: r.id,
                        status: r.status,
                        created_at: r.created_at,
                    })
                    .collect(),
            }),
        )
            .into_response());
    }

    let members = community_members::table
        .inner_join(users::table)
        .filter(community_members::community_id.eq(community_id))
        .select((community_members::member_role, users::all_columns))
        .load::<(MemberRole, User)>(conn)
        .await?;

    let (mut teachers, mut students) = (Vec::new(), Vec::new());
    for (member_role, user) in &members {
        match member_role {
            MemberRole::Teacher => teachers.push(UserSummary::from_user(user)),
            MemberRole::Student => students.push(UserSummary::from_user(user)),
        }
    }

    // only the admin reviews join requests
    let pending = if membership == Membership::Admin {
        load_pending_requests(conn, community_id).await?
    } else {
        Vec::new()
    };

    let materials = materials::table
        .inner_join(users::table)
        .filter(materials::community_id.eq(community_id))
        .order(materials::created_at.desc())
        .select((materials::all_columns, users::name))
        .load(conn)
        .await?
        .into_iter()
        .map(|(m, name)| MaterialResponse::from_material(m, name))
        .collect();

    Ok(Json(CommunityDetail {
        id: roster.community.id,
        name: roster.community.name.clone(),
        description: roster.community.description.clone(),
        join_code: roster.community.join_code.clone(),
        admin: UserSummary::from_user(&admin),
        teachers,
        students,
        join_requests: pending,
        materials,
        created_at: roster.community.created_at,
    })
    .into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinByCodeRequest {
    join_code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    message: String,
}

async fn insert_member(
    conn: &mut diesel_async::AsyncPgConnection,
    community_id: i32,
    user_id: i32,
    member_role: MemberRole,
) -> AppResult<bool> {
    #[derive(Insertable)]
    #[diesel(table_name = community_members)]
    struct NewMember {
        community_id: i32,
        user_id: i32,
        member_role: MemberRole,
        joined_at: NaiveDateTime,
    }

    // unique (community_id, user_id) backstops concurrent joins
    let inserted = diesel::insert_into(community_members::table)
        .values(NewMember {
            community_id,
            user_id,
            member_role,
            joined_at: chrono::Utc::now().naive_utc(),
        })
        .on_conflict((community_members::community_id, community_members::user_id))
        .do_nothing()
        .execute(conn)
        .await?;

    Ok(inserted > 0)
}

async fn join_by_code(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<JoinByCodeRequest>,
) -> AppResult<Json<MessageResponse>> {
    let conn = &mut pool.get().await?;

    let Some(community) = communities::table
        .filter(communities::join_code.eq(req.join_code.to_uppercase()))
        .first::<Community>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Invalid join code"));
    };

    let community_id = community.id;
    let roster = Roster::for_community(conn, community).await?;
    if roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "You are already a member of this community",
        ));
    }

    let Some(member_role) = membership::join_target(caller.role) else {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Admin accounts cannot join a community with a code",
        ));
    };

    if !insert_member(conn, community_id, caller.id, member_role).await? {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "You are already a member of this community",
        ));
    }

    Ok(Json(MessageResponse {
        message: "Successfully joined community".to_string(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestToJoinRequest {
    community_id: i32,
}

async fn request_to_join(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<RequestToJoinRequest>,
) -> AppResult<Json<MessageResponse>> {
    #[derive(Insertable)]
    #[diesel(table_name = join_requests)]
    struct NewJoinRequest {
        community_id: i32,
        user_id: i32,
        status: RequestStatus,
        created_at: NaiveDateTime,
    }

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, req.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "You are already a member of this community",
        ));
    }

    let already_pending = diesel::select(diesel::dsl::exists(
        join_requests::table
            .filter(join_requests::community_id.eq(req.community_id))
            .filter(join_requests::user_id.eq(caller.id))
            .filter(join_requests::status.eq(RequestStatus::Pending)),
    ))
    .get_result::<bool>(conn)
    .await?;

    if already_pending {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "You already have a pending join request",
        ));
    }

    // a partial unique index on (community_id, user_id) where status is
    // pending serializes concurrent duplicate requests; losing the race
    // surfaces here as a unique violation
    let inserted = diesel::insert_into(join_requests::table)
        .values(NewJoinRequest {
            community_id: req.community_id,
            user_id: caller.id,
            status: RequestStatus::Pending,
            created_at: chrono::Utc::now().naive_utc(),
        })
        .execute(conn)
        .await;

    match inserted {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::status(
                StatusCode::BAD_REQUEST,
                "You already have a pending join request",
            ));
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(MessageResponse {
        message: "Join request sent successfully".to_string(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandleRequestRequest {
    community_id: i32,
    user_id: i32,
    status: RequestStatus,
}

async fn handle_join_request(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<HandleRequestRequest>,
) -> AppResult<Json<MessageResponse>> {
    if req.status == RequestStatus::Pending {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Invalid status value",
        ));
    }

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, req.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if roster.community.admin_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Only admin can handle join requests",
        ));
    }

    let Some(request) = join_requests::table
        .filter(join_requests::community_id.eq(req.community_id))
        .filter(join_requests::user_id.eq(req.user_id))
        .filter(join_requests::status.eq(RequestStatus::Pending))
        .first::<JoinRequest>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(
            StatusCode::NOT_FOUND,
            "Join request not found",
        ));
    };

    if req.status == RequestStatus::Approved {
        // membership set follows the requester's stored account role
        let user = users::table
            .find(req.user_id)
            .first::<User>(conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "User not found"))?;

        let Some(member_role) = membership::join_target(user.role) else {
            return Err(AppError::status(
                StatusCode::BAD_REQUEST,
                "Admin accounts cannot join a community",
            ));
        };

        insert_member(conn, req.community_id, req.user_id, member_role).await?;
    }

    // handled requests are retained for audit with their final status
    diesel::update(join_requests::table.find(request.id))
        .set(join_requests::status.eq(req.status))
        .execute(conn)
        .await?;

    Ok(Json(MessageResponse {
        message: format!(
            "Join request {} successfully",
            req.status.as_str()
        ),
    }))
}

async fn load_pending_requests(
    conn: &mut diesel_async::AsyncPgConnection,
    community_id: i32,
) -> AppResult<Vec<JoinRequestView>> {
    let requests = join_requests::table
        .inner_join(users::table)
        .filter(join_requests::community_id.eq(community_id))
        .filter(join_requests::status.eq(RequestStatus::Pending))
        .order(join_requests::created_at.asc())
        .select((join_requests::all_columns, users::all_columns))
        .load::<(JoinRequest, User)>(conn)
        .await?;

    Ok(requests
        .into_iter()
        .map(|(request, user)| JoinRequestView {
            id: request.id,
            user: UserSummary::from_user(&user),
            status: request.status,
            created_at: request.created_at,
        })
        .collect())
}

async fn list_join_requests(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<Vec<JoinRequestView>>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if roster.community.admin_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Only admin can view join requests",
        ));
    }

    Ok(Json(load_pending_requests(conn, community_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveMemberRequest {
    community_id: i32,
    user_id: i32,
}

async fn remove_member(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    Json(req): Json<RemoveMemberRequest>,
) -> AppResult<Json<MessageResponse>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, req.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if roster.community.admin_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Only admin can remove members",
        ));
    }

    let removed = diesel::delete(
        community_members::table
            .filter(community_members::community_id.eq(req.community_id))
            .filter(community_members::user_id.eq(req.user_id)),
    )
    .execute(conn)
    .await?;

    if removed == 0 {
        return Err(AppError::status(
            StatusCode::NOT_FOUND,
            "Member not found in this community",
        ));
    }

    Ok(Json(MessageResponse {
        message: "Member removed successfully".to_string(),
    }))
}

async fn leave_community(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<MessageResponse>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if roster.community.admin_id == caller.id {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "Admin cannot leave the community. Please transfer admin rights or delete the community.",
        ));
    }

    let removed = diesel::delete(
        community_members::table
            .filter(community_members::community_id.eq(community_id))
            .filter(community_members::user_id.eq(caller.id)),
    )
    .execute(conn)
    .await?;

    if removed == 0 {
        return Err(AppError::status(
            StatusCode::BAD_REQUEST,
            "You are not a member of this community",
        ));
    }

    Ok(Json(MessageResponse {
        message: "Successfully left the community".to_string(),
    }))
}

async fn delete_community(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<MessageResponse>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if roster.community.admin_id != caller.id {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "Only admin can delete community",
        ));
    }

    let blob_names = materials::table
        .filter(materials::community_id.eq(community_id))
        .select(materials::file_name)
        .load::<String>(conn)
        .await?;

    // child rows first, then the community itself
    diesel::delete(events::table.filter(events::community_id.eq(community_id)))
        .execute(conn)
        .await?;
    diesel::delete(blogs::table.filter(blogs::community_id.eq(community_id)))
        .execute(conn)
        .await?;
    diesel::delete(materials::table.filter(materials::community_id.eq(community_id)))
        .execute(conn)
        .await?;
    diesel::delete(join_requests::table.filter(join_requests::community_id.eq(community_id)))
        .execute(conn)
        .await?;
    diesel::delete(
        community_members::table.filter(community_members::community_id.eq(community_id)),
    )
    .execute(conn)
    .await?;
    diesel::delete(communities::table.find(community_id))
        .execute(conn)
        .await?;

    for name in blob_names {
        material::remove_blob_if_unreferenced(conn, &name).await;
    }

    Ok(Json(MessageResponse {
        message: "Community deleted successfully".to_string(),
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/", post(create_community).get(list_communities))
        .route("/search", get(search_communities))
        .route("/join", post(join_by_code))
        .route("/request", post(request_to_join))
        .route("/request/handle", put(handle_join_request))
        .route("/members/remove", put(remove_member))
        .route("/:community_id", get(community_detail).delete(delete_community))
        .route("/:community_id/requests", get(list_join_requests))
        .route("/:community_id/leave", post(leave_community))
        .route(
            "/:community_id/events",
            post(event::create_event).get(event::list_events),
        )
}
