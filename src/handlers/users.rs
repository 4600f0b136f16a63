//! Simulated user resource.
//!
//! Nothing is persisted: list and get synthesize records, create/update echo
//! the validated input back. Identifiers follow `USER_ID_FORMAT`.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use rand::Rng;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::models::{
    ApiResponse, CreateUserRequest, Deleted, ListUsersQuery, Pagination, UpdateUserRequest, User,
    UserList, UserPath,
};
use crate::state::AppState;
use crate::validation::IdFormat;

/// Size of the simulated user collection.
const SAMPLE_USERS: u64 = 25;

fn new_user_id(format: IdFormat) -> String {
    match format {
        IdFormat::Hex24 => {
            let mut rng = rand::rng();
            format!("{:08x}{:016x}", rng.random::<u32>(), rng.random::<u64>())
        }
        IdFormat::PositiveInteger => rand::rng().random_range(1..=i64::MAX).to_string(),
        IdFormat::UuidV4 => Uuid::new_v4().to_string(),
    }
}

fn sample_user(id: String, role: &str) -> User {
    let handle = id.chars().filter(char::is_ascii_alphanumeric).take(8).collect::<String>();
    let now = Utc::now();
    User {
        email: format!("user_{handle}@example.com"),
        username: format!("user_{handle}"),
        id,
        name: None,
        role: role.to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// List users with pagination and an optional role filter.
#[instrument(skip(state, ctx))]
pub async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<Json<ApiResponse<UserList>>> {
    let query: ListUsersQuery = ctx.query_as()?;
    let role = query.role.as_deref().unwrap_or("user");

    let offset = u64::try_from((query.page - 1).saturating_mul(query.limit)).unwrap_or(u64::MAX);
    let count = SAMPLE_USERS
        .saturating_sub(offset)
        .min(u64::try_from(query.limit).unwrap_or(0));
    let users = (0..count)
        .map(|_| sample_user(new_user_id(state.config.user_id_format), role))
        .collect();

    Ok(Json(ApiResponse::ok(UserList {
        users,
        pagination: Pagination {
            page: query.page,
            limit: query.limit,
            total: SAMPLE_USERS,
            sort: query.sort,
            order: query.order,
        },
    })))
}

/// Get a user by id.
#[instrument(skip(ctx))]
pub async fn get_user(ctx: RequestContext) -> AppResult<Json<ApiResponse<User>>> {
    let UserPath { id } = ctx.params_as()?;
    Ok(Json(ApiResponse::ok(sample_user(id, "user"))))
}

/// Create a user. The password is accepted but never stored or returned.
#[instrument(skip(state, ctx))]
pub async fn create_user(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    let CreateUserRequest {
        username,
        email,
        password,
        name,
    } = ctx.body_as()?;
    drop(password);

    let now = Utc::now();
    let user = User {
        id: new_user_id(state.config.user_id_format),
        username,
        email,
        name,
        role: "user".to_string(),
        created_at: now,
        updated_at: now,
    };
    info!(user_id = %user.id, "User created");

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

/// Update a user's name and/or email.
#[instrument(skip(ctx))]
pub async fn update_user(ctx: RequestContext) -> AppResult<Json<ApiResponse<User>>> {
    let UserPath { id } = ctx.params_as()?;
    let update: UpdateUserRequest = ctx.body_as()?;

    let mut user = sample_user(id, "user");
    if let Some(email) = update.email {
        user.email = email;
    }
    user.name = update.name;
    user.updated_at = Utc::now();

    info!(user_id = %user.id, "User updated");
    Ok(Json(ApiResponse::ok(user)))
}

/// Delete a user.
#[instrument(skip(ctx))]
pub async fn delete_user(ctx: RequestContext) -> AppResult<Json<ApiResponse<Deleted>>> {
    let UserPath { id } = ctx.params_as()?;
    info!(user_id = %id, "User deleted");
    Ok(Json(ApiResponse::ok(Deleted { id, deleted: true })))
}
