use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use palaver_shared::constants::MAX_NAME_CHARS;
use palaver_shared::UserId;
use palaver_store::{NewUser, ProfileUpdate, StoreError, User};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::auth::{generate_api_token, verify_admin_token, AuthUser};
use crate::error::ServerError;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    name: String,
    email: String,
    phone: Option<String>,
}

#[derive(Serialize)]
pub struct CreateUserResponse {
    user: User,
    api_token: String,
}

#[derive(Deserialize)]
pub struct ContactsQuery {
    search: Option<String>,
}

fn validate_name(name: &str) -> Result<String, ServerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServerError::Validation("Name is required".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ServerError::Validation(format!(
            "Name is longer than {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

pub async fn admin_create_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let name = validate_name(&req.name)?;
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ServerError::Validation("Email address is invalid".into()));
    }

    let api_token = generate_api_token();
    let user = {
        let db = state.db.lock().await;
        match db.get_user_by_email(&email) {
            Ok(_) => return Err(ServerError::Conflict("Email is already registered".into())),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        db.create_user(
            &NewUser {
                name,
                email,
                phone: req.phone.filter(|p| !p.trim().is_empty()),
            },
            &api_token,
        )?
    };

    info!(user = %user.id, "Admin created user");
    Ok((StatusCode::CREATED, Json(CreateUserResponse { user, api_token })))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(mut update): Json<ProfileUpdate>,
) -> Result<Json<User>, ServerError> {
    if let Some(name) = update.name.as_deref() {
        update.name = Some(validate_name(name)?);
    }
    let db = state.db.lock().await;
    Ok(Json(db.update_profile(user.id, &update)?))
}

/// Everyone except the caller, optionally filtered by name or email.
pub async fn contacts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<Vec<User>>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(db.list_contacts(user.id, query.search.as_deref())?))
}

pub async fn show(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ServerError> {
    let db = state.db.lock().await;
    Ok(Json(db.get_user(id).map_err(ServerError::lookup("User"))?))
}
