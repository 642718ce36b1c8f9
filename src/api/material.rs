use crate::{
    auth::ExtractAuth,
    error::{AppError, AppResult},
    files,
    membership::Membership,
    membership::Roster,
    models::{FileCategory, Material, Role},
    schema::*,
    DbPool,
};
use axum::{
    body::StreamBody,
    extract::{Multipart, Path, Query},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::NaiveDateTime;
use diesel::{dsl::sql, prelude::*, sql_types::Bool, sql_types::Text};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialResponse {
    pub id: i32,
    pub community_id: i32,
    pub title: String,
    pub description: String,
    pub original_file_name: String,
    pub file_type: FileCategory,
    pub mime_type: String,
    pub author_name: String,
    pub author_role: Role,
    pub tags: Vec<String>,
    pub created_at: NaiveDateTime,
}

impl MaterialResponse {
    pub fn from_material(material: Material, author_name: String) -> Self {
        Self {
            id: material.id,
            community_id: material.community_id,
            title: material.title,
            description: material.description,
            original_file_name: material.original_file_name,
            file_type: material.category,
            mime_type: material.mime_type,
            author_name,
            author_role: material.author_role,
            tags: material.tags,
            created_at: material.created_at,
        }
    }
}

fn bad_multipart(_: axum::extract::multipart::MultipartError) -> AppError {
    AppError::status(StatusCode::BAD_REQUEST, "invalid multipart payload")
}

// uploads are buffered for hashing, so the whole blob sits in memory once
const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

fn append_within_limit(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    if buf.len() + chunk.len() > limit {
        return false;
    }
    buf.extend_from_slice(chunk);
    true
}

async fn upload_material(
    Extension(pool): Extension<DbPool>,
    ExtractAuth(caller): ExtractAuth,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MaterialResponse>)> {
    #[derive(Insertable)]
    #[diesel(table_name = materials)]
    struct NewMaterial {
        community_id: i32,
        author_id: i32,
        author_role: Role,
        title: String,
        description: String,
        file_name: String,
        original_file_name: String,
        category: FileCategory,
        mime_type: String,
        tags: Vec<String>,
        created_at: NaiveDateTime,
    }

    let mut title = None;
    let mut description = None;
    let mut community_id: Option<i32> = None;
    let mut tags = Vec::new();
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("title") => title = Some(field.text().await.map_err(bad_multipart)?),
            Some("description") => description = Some(field.text().await.map_err(bad_multipart)?),
            Some("communityId") => {
                community_id = Some(
                    field
                        .text()
                        .await
                        .map_err(bad_multipart)?
                        .parse()
                        .map_err(|_| {
                            AppError::status(StatusCode::BAD_REQUEST, "invalid community id")
                        })?,
                )
            }
            Some("tags") => {
                tags = super::parse_tags(&field.text().await.map_err(bad_multipart)?)
            }
            Some("file") => {
                let name = field
                    .file_name()
                    .unwrap_or("upload")
                    .to_string();
                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                    if !append_within_limit(&mut data, &chunk, MAX_FILE_BYTES) {
                        return Err(AppError::status(
                            StatusCode::BAD_REQUEST,
                            "File exceeds the 10 MB upload limit",
                        ));
                    }
                }
                file = Some((name, data));
            }
            _ => {}
        }
    }

    let Some((original_file_name, data)) = file else {
        return Err(AppError::status(StatusCode::BAD_REQUEST, "No file uploaded"));
    };
    let title =
        title.ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "Title is required"))?;
    let description = description
        .ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "Description is required"))?;
    let community_id = community_id
        .ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "Community is required"))?;

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community",
        ));
    }

    let (category, mime_type) = files::classify(&original_file_name, &data);
    let file_name = files::storage_name(&original_file_name, &data);

    tokio::fs::create_dir_all(&*files::UPLOAD_DIR).await?;
    tokio::fs::write(files::UPLOAD_DIR.join(&file_name), &data).await?;

    let material = diesel::insert_into(materials::table)
        .values(NewMaterial {
            community_id,
            author_id: caller.id,
            author_role: caller.role,
            title,
            description,
            file_name,
            original_file_name,
            category,
            mime_type,
            tags,
            created_at: chrono::Utc::now().naive_utc(),
        })
        .get_result::<Material>(conn)
        .await?;

    let author_name = users::table
        .find(caller.id)
        .select(users::name)
        .first::<String>(conn)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MaterialResponse::from_material(material, author_name)),
    ))
}

async fn list_materials(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<Vec<MaterialResponse>>> {
    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community",
        ));
    }

    let materials = materials::table
        .inner_join(users::table)
        .filter(materials::community_id.eq(community_id))
        .order(materials::created_at.desc())
        .select((materials::all_columns, users::name))
        .load::<(Material, String)>(conn)
        .await?;

    Ok(Json(
        materials
            .into_iter()
            .map(|(m, name)| MaterialResponse::from_material(m, name))
            .collect(),
    ))
}

#[derive(Deserialize)]
struct SearchQuery {
    keyword: Option<String>,
}

async fn search_materials(
    Extension(pool): Extension<DbPool>,
    Path(community_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<MaterialResponse>>> {
    let keyword = query
        .keyword
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::status(StatusCode::BAD_REQUEST, "Keyword is required"))?;
    let pattern = format!("%{}%", keyword);

    let conn = &mut pool.get().await?;

    let roster = Roster::load(conn, community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community",
        ));
    }

    let tag_match = sql::<Bool>("EXISTS (SELECT 1 FROM unnest(tags) AS tag WHERE tag ILIKE ")
        .bind::<Text, _>(pattern.clone())
        .sql(")");

    let materials = materials::table
        .inner_join(users::table)
        .filter(materials::community_id.eq(community_id))
        .filter(
            materials::title
                .ilike(pattern.clone())
                .or(materials::description.ilike(pattern))
                .or(tag_match),
        )
        .order(materials::created_at.desc())
        .select((materials::all_columns, users::name))
        .load::<(Material, String)>(conn)
        .await?;

    Ok(Json(
        materials
            .into_iter()
            .map(|(m, name)| MaterialResponse::from_material(m, name))
            .collect(),
    ))
}

/// Blobs are content addressed and may back several material records;
/// only remove the file once nothing references it. Failures are logged
/// and swallowed, an orphaned blob is better than a failed delete.
pub async fn remove_blob_if_unreferenced(conn: &mut AsyncPgConnection, file_name: &str) {
    let references = materials::table
        .filter(materials::file_name.eq(file_name))
        .count()
        .get_result::<i64>(conn)
        .await;

    match references {
        Ok(0) => {
            let path = files::UPLOAD_DIR.join(file_name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!("failed to remove blob {}: {e}", path.display());
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("failed to count blob references for {file_name}: {e}"),
    }
}

async fn delete_material(
    Extension(pool): Extension<DbPool>,
    Path(material_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
) -> AppResult<Json<serde_json::Value>> {
    let conn = &mut pool.get().await?;

    let Some(material) = materials::table
        .find(material_id)
        .first::<Material>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Material not found"));
    };

    let roster = Roster::load(conn, material.community_id)
        .await?
        .ok_or_else(|| AppError::status(StatusCode::NOT_FOUND, "Community not found"))?;

    // author or the community admin; the account-level role carries no
    // deletion rights here
    let is_author = material.author_id == caller.id;
    if !is_author && roster.resolve(caller.id) != Membership::Admin {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not authorized to delete this material",
        ));
    }

    diesel::delete(materials::table.find(material_id))
        .execute(conn)
        .await?;

    remove_blob_if_unreferenced(conn, &material.file_name).await;

    Ok(Json(serde_json::json!({
        "message": "Material deleted successfully"
    })))
}

#[derive(Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    view: bool,
}

fn attachment_headers(mime_type: &str, disposition: &str, file_name: &str) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(mime_type)?);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("{disposition}; filename=\"{file_name}\""))?,
    );
    Ok(headers)
}

/// Converts an office document to PDF with a headless libreoffice run,
/// returning the PDF bytes. The scratch file is removed before returning.
async fn convert_to_pdf(original_path: &std::path::Path, file_name: &str) -> anyhow::Result<Vec<u8>> {
    tokio::fs::create_dir_all(&*files::SCRATCH_DIR).await?;

    let output = tokio::process::Command::new("soffice")
        .args(["--headless", "--convert-to", "pdf", "--outdir"])
        .arg(&*files::SCRATCH_DIR)
        .arg(original_path)
        .output()
        .await?;

    if !output.status.success() {
        anyhow::bail!(
            "conversion exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let pdf_path = files::SCRATCH_DIR.join(format!("{}.pdf", files::stem(file_name)));
    let data = tokio::fs::read(&pdf_path)
        .await
        .map_err(|_| anyhow::anyhow!("conversion produced no output file"))?;

    if let Err(e) = tokio::fs::remove_file(&pdf_path).await {
        tracing::warn!("failed to remove scratch pdf {}: {e}", pdf_path.display());
    }

    Ok(data)
}

async fn download_material(
    Extension(pool): Extension<DbPool>,
    Path(material_id): Path<i32>,
    ExtractAuth(caller): ExtractAuth,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let conn = &mut pool.get().await?;

    let Some(material) = materials::table
        .find(material_id)
        .first::<Material>(conn)
        .await
        .optional()? else {
        return Err(AppError::status(StatusCode::NOT_FOUND, "Material not found"));
    };

    let roster = Roster::load(conn, material.community_id)
        .await?
        .ok_or_else(|| {
            AppError::status(StatusCode::NOT_FOUND, "Community not found for this material")
        })?;

    if !roster.resolve(caller.id).is_member() {
        return Err(AppError::status(
            StatusCode::FORBIDDEN,
            "You are not a member of this community and cannot access this material",
        ));
    }

    let original_path = files::UPLOAD_DIR.join(&material.file_name);
    if tokio::fs::metadata(&original_path).await.is_err() {
        return Err(AppError::status(
            StatusCode::NOT_FOUND,
            "File not found on server",
        ));
    }

    if query.view && files::needs_pdf_conversion(material.category) {
        match convert_to_pdf(&original_path, &material.file_name).await {
            Ok(pdf) => {
                let pdf_name = format!("{}.pdf", files::stem(&material.original_file_name));
                let headers =
                    attachment_headers(mime::APPLICATION_PDF.as_ref(), "inline", &pdf_name)?;
                return Ok((headers, pdf).into_response());
            }
            Err(e) => {
                // fall back to serving the original as a download
                tracing::warn!(
                    "pdf conversion failed for material {}: {e:#}",
                    material.id
                );
            }
        }
    }

    let disposition = if query.view && !files::needs_pdf_conversion(material.category) {
        "inline"
    } else {
        "attachment"
    };
    let headers = attachment_headers(
        &material.mime_type,
        disposition,
        &material.original_file_name,
    )?;

    let file = tokio::fs::File::open(&original_path).await?;
    let body = StreamBody::new(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub fn app() -> Router {
    Router::new()
        .route("/", post(upload_material))
        .route("/community/:community_id", get(list_materials))
        .route("/search/:community_id", get(search_materials))
        .route("/download/:material_id", get(download_material))
        .route("/:material_id", delete(delete_material))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_cap_rejects_the_overflowing_chunk() {
        let mut buf = Vec::new();
        assert!(append_within_limit(&mut buf, &[0u8; 8], 10));
        assert!(append_within_limit(&mut buf, &[0u8; 2], 10));
        assert_eq!(buf.len(), 10);

        // at the limit; one more byte must be refused and leave buf intact
        assert!(!append_within_limit(&mut buf, &[0u8; 1], 10));
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn upload_cap_allows_small_files_through() {
        let mut buf = Vec::new();
        assert!(append_within_limit(&mut buf, b"lecture notes", MAX_FILE_BYTES));
        assert_eq!(buf, b"lecture notes");
    }
}
