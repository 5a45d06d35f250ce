use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use palaver_shared::BlobId;
use palaver_store::BlobMeta;
use tracing::{info, warn};

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;

/// Upload the multipart field named `file`.
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BlobMeta>), ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "file".to_string());
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))?;

        let stored = state.blob_store.store(&data).await?;
        let meta = BlobMeta {
            id: stored.id,
            uploader_id: user.id,
            file_name,
            content_type,
            file_size: stored.size as i64,
            blake3_hash: stored.hash,
            created_at: chrono::Utc::now(),
        };

        let inserted = {
            let db = state.db.lock().await;
            db.insert_blob(&meta)
        };
        if let Err(e) = inserted {
            if let Err(cleanup) = state.blob_store.delete(stored.id).await {
                warn!(id = %stored.id, error = %cleanup, "Failed to remove orphaned blob");
            }
            return Err(e.into());
        }

        info!(id = %meta.id, size = meta.file_size, uploader = %user.id, "File uploaded");
        return Ok((StatusCode::CREATED, Json(meta)));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

/// Only the uploader and users who received the file in a message may
/// download it.
pub async fn download(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<BlobId>,
) -> Result<impl IntoResponse, ServerError> {
    let meta = {
        let db = state.db.lock().await;
        let meta = db.get_blob_meta(id).map_err(ServerError::lookup("File"))?;
        if !db.blob_visible_to(id, user.id)? {
            return Err(ServerError::Forbidden("You cannot access this file".into()));
        }
        meta
    };
    let data = state.blob_store.read(id).await?;

    let content_type = meta
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let disposition = format!("attachment; filename=\"{}\"", meta.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

/// Keep a file name safe to echo back in a header.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    base.chars()
        .map(|c| if c.is_control() || c == '"' { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{token, TestApp};
    use axum::body::Body;
    use axum::http::Request;

    const BOUNDARY: &str = "palaver-boundary";

    fn upload_request(auth: &str, file_name: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/files")
            .header("authorization", format!("Bearer {auth}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn download_request(auth: &str, id: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .uri(format!("/files/{}", id.as_str().unwrap()))
            .header("authorization", format!("Bearer {auth}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;

        let (status, meta) = app
            .send(upload_request(&token("Alice"), "notes.txt", b"meeting at 5"))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(meta["file_name"], "notes.txt");
        assert_eq!(meta["file_size"], 12);
        assert_eq!(
            meta["blake3_hash"],
            blake3::hash(b"meeting at 5").to_hex().to_string()
        );

        // Not shared with Bob yet.
        let req = download_request(&token("Bob"), &meta["id"]);
        let resp = tower::ServiceExt::oneshot(app.router.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let (status, _) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Alice")),
                Some(serde_json::json!({ "receiver_id": bob.id, "file_id": meta["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let req = download_request(&token("Bob"), &meta["id"]);
        let resp = tower::ServiceExt::oneshot(app.router.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"meeting at 5");
    }

    #[tokio::test]
    async fn test_download_requires_access() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        app.user("Carol").await;

        let (_, meta) = app
            .send(upload_request(&token("Alice"), "notes.txt", b"private"))
            .await;

        let req = download_request(&token("Alice"), &meta["id"]);
        let resp = tower::ServiceExt::oneshot(app.router.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = download_request(&token("Carol"), &meta["id"]);
        let resp = tower::ServiceExt::oneshot(app.router.clone(), req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let app = TestApp::new().await;
        app.user("Alice").await;

        let (status, _) = app
            .send(upload_request(&token("Alice"), "big.bin", &[7u8; 1500]))
            .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_attach_uploaded_file() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;

        let (_, meta) = app
            .send(upload_request(&token("Alice"), "pic.png", b"png-bytes"))
            .await;
        let (status, message) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Alice")),
                Some(serde_json::json!({ "receiver_id": bob.id, "file_id": meta["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["file"]["file_name"], "pic.png");
        assert!(message["body"].is_null());
    }

    #[tokio::test]
    async fn test_attach_foreign_file_rejected() {
        let app = TestApp::new().await;
        app.user("Alice").await;
        let bob = app.user("Bob").await;
        let carol = app.user("Carol").await;

        let (_, meta) = app
            .send(upload_request(&token("Alice"), "pic.png", b"png-bytes"))
            .await;
        let (status, _) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Carol")),
                Some(serde_json::json!({ "receiver_id": bob.id, "file_id": meta["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Once Bob has received it, he may forward it.
        app.request(
            "POST",
            "/messages",
            Some(&token("Alice")),
            Some(serde_json::json!({ "receiver_id": bob.id, "file_id": meta["id"] })),
        )
        .await;
        let (status, _) = app
            .request(
                "POST",
                "/messages",
                Some(&token("Bob")),
                Some(serde_json::json!({ "receiver_id": carol.id, "file_id": meta["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\docs\\a\"b.txt"), "a_b.txt");
    }
}
