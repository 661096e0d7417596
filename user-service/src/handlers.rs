use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bcrypt::{hash, verify, DEFAULT_COST};
use bson::oid::ObjectId;
use serde::Deserialize;
use serde_json::json;

use parley_auth::AuthenticatedUser;
use parley_error::{AppError, AppResult};
use parley_types::{
    Contact, ContactRequest, Group, GroupRequest, GroupResponse, LoginResponse, ProfileUpdate,
    StatusResponse, StatusUpdate, User, UserLogin, UserRegistration, UserResponse, UserStatus,
};

use crate::state::ServiceContext;
use crate::store::DEFAULT_SEARCH_LIMIT;

// ============================================================================
// Registration and login
// ============================================================================

pub async fn register(
    State(ctx): State<ServiceContext>,
    Json(req): Json<UserRegistration>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::validation("username and password are required"));
    }
    if !req.email.contains('@') {
        return Err(AppError::validation("email is not valid"));
    }

    let password_hash = hash(&req.password, DEFAULT_COST)?;
    let mut user = User::new(req.username.trim().to_string(), req.email, password_hash);
    user.full_name = req.full_name;
    user.avatar_url = req.avatar_url;

    ctx.store.insert_user(&user).await?;
    parley_metrics::USERS_REGISTERED_TOTAL.inc();
    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok((StatusCode::CREATED, Json(user.to_response())))
}

pub async fn login(
    State(ctx): State<ServiceContext>,
    Json(req): Json<UserLogin>,
) -> AppResult<Json<LoginResponse>> {
    let user = ctx
        .store
        .find_by_username(&req.username)
        .await?
        .ok_or_else(|| AppError::auth("invalid username or password"))?;

    if !verify(&req.password, &user.password_hash)? {
        return Err(AppError::auth("invalid username or password"));
    }

    let (token, expires_at) = ctx
        .auth
        .generate_token(&user.id.to_hex(), &user.username)?;
    ctx.store.record_login(user.id).await?;

    parley_metrics::LOGINS_TOTAL.inc();
    tracing::info!(user_id = %user.id, "login");

    Ok(Json(LoginResponse {
        token,
        expires_at: expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        user: user.to_response(),
    }))
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UserSearchParams {
    pub query: Option<String>,
    pub limit: Option<i64>,
}

pub async fn search_users(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Query(params): Query<UserSearchParams>,
) -> AppResult<Json<Vec<UserResponse>>> {
    let query = params
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::validation("query is required"))?;
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 100);

    let users = ctx.store.search_users(query, limit, user.user_id).await?;
    Ok(Json(users.iter().map(User::to_response).collect()))
}

pub async fn get_user(
    State(ctx): State<ServiceContext>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let id = ObjectId::parse_str(&id).map_err(|_| AppError::validation("invalid user id"))?;
    let user = ctx
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(user.to_response()))
}

pub async fn update_profile(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<UserResponse>> {
    let id = ObjectId::parse_str(&id).map_err(|_| AppError::validation("invalid user id"))?;
    if id != user.user_id {
        return Err(AppError::forbidden("cannot update another user's profile"));
    }

    let status = update
        .status
        .as_deref()
        .map(|s| s.parse::<UserStatus>().map_err(AppError::validation))
        .transpose()?;

    let updated = ctx
        .store
        .update_profile(id, &update, status)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(updated.to_response()))
}

pub async fn update_status(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> AppResult<Json<StatusResponse>> {
    let id = ObjectId::parse_str(&id).map_err(|_| AppError::validation("invalid user id"))?;
    if id != user.user_id {
        return Err(AppError::forbidden("cannot update another user's status"));
    }

    let status: UserStatus = update.status.parse().map_err(AppError::validation)?;
    if !ctx.store.update_status(id, status).await? {
        return Err(AppError::not_found("user not found"));
    }

    Ok(Json(StatusResponse {
        user_id: id.to_hex(),
        status,
    }))
}

// ============================================================================
// Contacts
// ============================================================================

/// The contact list is the union of explicit contact rows and everyone the
/// caller has a 1:1 message history with.
pub async fn get_contacts(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut ids = ctx.store.contact_ids_of(user.user_id).await?;
    ids.extend(ctx.store.message_counterparties(user.user_id).await?);
    ids.sort_unstable();
    ids.dedup();

    let users = ctx.store.users_by_ids(&ids).await?;
    Ok(Json(users.iter().map(User::to_response).collect()))
}

pub async fn add_contact(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Json(req): Json<ContactRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let contact_id = ObjectId::parse_str(&req.contact_id)
        .map_err(|_| AppError::validation("contact_id is not a valid id"))?;
    if contact_id == user.user_id {
        return Err(AppError::validation("cannot add yourself as a contact"));
    }
    if ctx.store.find_by_id(contact_id).await?.is_none() {
        return Err(AppError::not_found("user not found"));
    }

    if ctx
        .store
        .find_contact(user.user_id, contact_id)
        .await?
        .is_some()
    {
        return Ok((
            StatusCode::OK,
            Json(json!({ "message": "contact already exists" })),
        ));
    }

    let contact = Contact::new(user.user_id, contact_id);
    let inserted = ctx.store.insert_contact(&contact).await?;
    let status = if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "message": "contact added" }))))
}

pub async fn delete_contact(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let contact_id =
        ObjectId::parse_str(&id).map_err(|_| AppError::validation("invalid contact id"))?;

    if !ctx.store.delete_contact(user.user_id, contact_id).await? {
        return Err(AppError::not_found("contact not found"));
    }
    Ok(Json(json!({ "message": "contact removed" })))
}

// ============================================================================
// Groups
// ============================================================================

pub async fn create_group(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Json(req): Json<GroupRequest>,
) -> AppResult<(StatusCode, Json<GroupResponse>)> {
    if req.name.trim().is_empty() {
        return Err(AppError::validation("name is required"));
    }

    let mut member_ids = vec![user.user_id];
    for raw in &req.member_ids {
        let id = ObjectId::parse_str(raw)
            .map_err(|_| AppError::validation(format!("invalid member id: {}", raw)))?;
        member_ids.push(id);
    }
    member_ids.sort_unstable();
    member_ids.dedup();

    if member_ids.len() < 2 {
        return Err(AppError::validation("a group needs at least two members"));
    }
    if ctx.store.count_users(&member_ids).await? != member_ids.len() as u64 {
        return Err(AppError::validation("unknown member id"));
    }

    let now = parley_types::now();
    let group = Group {
        id: ObjectId::new(),
        name: req.name.trim().to_string(),
        description: req.description,
        owner_id: user.user_id,
        member_ids,
        avatar_url: String::new(),
        created_at: now,
        updated_at: now,
    };
    ctx.store.insert_group(&group).await?;
    tracing::info!(group_id = %group.id, owner = %user.user_id, members = group.member_ids.len(), "group created");

    Ok((StatusCode::CREATED, Json(group.to_response())))
}

pub async fn list_groups(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<GroupResponse>>> {
    let groups = ctx.store.groups_for_member(user.user_id).await?;
    Ok(Json(groups.iter().map(Group::to_response).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_member_dedup_keeps_the_owner() {
        // Mirrors the handler's member normalization.
        let owner = ObjectId::new();
        let other = ObjectId::new();
        let mut member_ids = vec![owner, other, owner, other];
        member_ids.sort_unstable();
        member_ids.dedup();
        assert_eq!(member_ids.len(), 2);
        assert!(member_ids.contains(&owner));
    }
}
