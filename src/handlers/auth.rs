//! Authentication handlers.

use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{
        password::PasswordService,
        session::{SessionError, SessionStore},
        Subject,
    },
    error::{get_db_conn, ApiError, ApiResult},
    models::{User, Workspace},
    repo::UserRepo,
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[schema(example = "Acme Inc")]
    pub workspace_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access: String,
    pub refresh: String,
    #[schema(example = 900)]
    pub expires_in: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    #[schema(example = "user@example.com")]
    pub email: String,
    #[schema(example = "owner")]
    pub role: String,
    pub is_active: bool,
    pub created_at: chrono::NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            workspace_id: user.workspace_id,
            email: user.email,
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkspaceResponse {
    pub id: Uuid,
    pub name: String,
    pub plan: String,
    pub created_at: chrono::NaiveDateTime,
}

impl From<Workspace> for WorkspaceResponse {
    fn from(workspace: Workspace) -> Self {
        Self {
            id: workspace.id,
            name: workspace.name,
            plan: workspace.plan,
            created_at: workspace.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentUserResponse {
    pub user: UserResponse,
    pub workspace: WorkspaceResponse,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Authentication",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registration successful", body = RegisterResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 409, description = "Email already registered", body = ApiError)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    if let Err(e) = payload.validate() {
        return Err(ApiError::bad_request(
            format!("Validation error: {}", e),
            "VALIDATION_ERROR",
        ));
    }

    if let Err(e) = state.password_policy.validate(&payload.password) {
        return Err(ApiError::bad_request(
            e.to_string(),
            "PASSWORD_POLICY_VIOLATION",
        ));
    }

    let password_hash =
        PasswordService::hash_password_with_cost(&payload.password, state.config.auth.password_hash_cost)
            .map_err(|e| {
                error!(error = %e, "Password hashing failed");
                ApiError::internal("Failed to process password", "PASSWORD_HASH_ERROR")
            })?;

    let workspace_name = payload
        .workspace_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("{}'s workspace", payload.email));

    let mut conn = get_db_conn(&state.db_pool)?;

    let (user, _workspace) =
        UserRepo::create_with_workspace(&mut conn, &payload.email, &password_hash, &workspace_name)
            .map_err(|e| {
                warn!(error = %e, email = %payload.email, "Registration failed");
                ApiError::conflict("A user with this email already exists", "USER_EXISTS")
            })?;

    info!(user_id = %user.id, workspace_id = %user.workspace_id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user: user.into() }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Authentication",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ApiError),
        (status = 423, description = "Account locked", body = ApiError)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    if let Err(e) = payload.validate() {
        return Err(ApiError::bad_request(
            format!("Validation error: {}", e),
            "VALIDATION_ERROR",
        ));
    }

    if let Some(remaining) = state.lockout.locked_for(&payload.email).await {
        warn!(email = %payload.email, "Login attempt for locked account");
        return Err(ApiError::locked(
            format!("Account is locked. Try again in {} seconds", remaining),
            "ACCOUNT_LOCKED",
        ));
    }

    let mut conn = get_db_conn(&state.db_pool)?;

    let user = UserRepo::find_by_email(&mut conn, &payload.email)
        .map_err(|e| {
            error!(error = %e, "Database error during login");
            ApiError::db_error()
        })?
        .ok_or_else(|| {
            warn!(email = %payload.email, "Login attempt for unknown email");
            ApiError::unauthorized("Invalid credentials", "INVALID_CREDENTIALS")
        })?;

    if !user.is_active {
        warn!(user_id = %user.id, "Login attempt for inactive user");
        return Err(ApiError::forbidden(
            "Account is inactive",
            "ACCOUNT_INACTIVE",
        ));
    }

    let is_valid = PasswordService::verify_password(&payload.password, &user.password_hash)
        .map_err(|e| {
            error!(error = %e, "Password verification error");
            ApiError::internal("Password verification error", "PASSWORD_VERIFY_ERROR")
        })?;

    if !is_valid {
        warn!(user_id = %user.id, "Failed login attempt");
        state.lockout.record_failure(&payload.email).await;
        return Err(ApiError::unauthorized(
            "Invalid credentials",
            "INVALID_CREDENTIALS",
        ));
    }

    state.lockout.clear(&payload.email).await;

    // Adaptive cost: hashes from an older cost setting are upgraded on the
    // verified plaintext.
    let cost = state.config.auth.password_hash_cost;
    if PasswordService::needs_rehash(&user.password_hash, cost) {
        match PasswordService::hash_password_with_cost(&payload.password, cost) {
            Ok(new_hash) => {
                if let Err(e) = UserRepo::update_password_hash(&mut conn, user.id, &new_hash) {
                    warn!(error = %e, user_id = %user.id, "Password re-hash failed");
                } else {
                    info!(user_id = %user.id, "Password hash upgraded");
                }
            }
            Err(e) => warn!(error = %e, user_id = %user.id, "Password re-hash failed"),
        }
    }

    let tokens = issue_tokens(&state, &mut conn, &user)?;

    info!(user_id = %user.id, workspace_id = %user.workspace_id, "User logged in");
    Ok(Json(tokens))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "Authentication",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenResponse),
        (status = 401, description = "Invalid, expired, or replayed refresh token", body = ApiError)
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let mut conn = get_db_conn(&state.db_pool)?;

    let (session, refresh_token) = SessionStore::rotate(
        &mut conn,
        &payload.refresh,
        state.config.auth.refresh_ttl_seconds,
    )
    .map_err(|e| match e {
        SessionError::Replayed => {
            ApiError::unauthorized("Refresh token is no longer valid", "REFRESH_REPLAYED")
        }
        SessionError::NotFound | SessionError::Expired => {
            ApiError::unauthorized("Invalid or expired refresh token", "INVALID_REFRESH_TOKEN")
        }
        SessionError::Database(e) => {
            error!(error = %e, "Database error during rotation");
            ApiError::db_error()
        }
    })?;

    let user = UserRepo::unscoped_get(&mut conn, session.user_id).map_err(|e| {
        error!(error = %e, "Database error loading user for rotation");
        ApiError::db_error()
    })?;

    let Some(user) = user else {
        return Err(ApiError::unauthorized("User not found", "USER_NOT_FOUND"));
    };

    if !user.is_active {
        return Err(ApiError::forbidden(
            "Account is inactive",
            "ACCOUNT_INACTIVE",
        ));
    }

    let role = crate::auth::Role::parse(&user.role).unwrap_or(crate::auth::Role::Member);

    let access = state
        .jwt_config
        .generate_access_token(user.id, user.workspace_id, role, session.id)
        .map_err(|e| {
            error!(error = %e, "Token generation failed");
            ApiError::internal("Token generation failed", "TOKEN_GENERATION_ERROR")
        })?;

    info!(user_id = %user.id, session_id = %session.id, "Tokens rotated");

    Ok(Json(TokenResponse {
        access,
        refresh: refresh_token,
        expires_in: state.config.auth.access_ttl_seconds,
    }))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Authentication",
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
) -> ApiResult<StatusCode> {
    let mut conn = get_db_conn(&state.db_pool)?;

    SessionStore::logout(&mut conn, subject.session_id).map_err(|e| {
        error!(error = %e, "Logout failed");
        ApiError::internal("Failed to logout", "LOGOUT_ERROR")
    })?;

    info!(user_id = %subject.user_id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Authentication",
    responses(
        (status = 200, description = "Current user and workspace", body = CurrentUserResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    Extension(subject): Extension<Subject>,
) -> ApiResult<Json<CurrentUserResponse>> {
    let mut conn = get_db_conn(&state.db_pool)?;

    let user = UserRepo::get(&mut conn, &subject, subject.user_id)
        .map_err(|e| {
            error!(error = %e, "Database error loading current user");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("User"))?;

    let workspace = UserRepo::get_workspace(&mut conn, &subject)
        .map_err(|e| {
            error!(error = %e, "Database error loading workspace");
            ApiError::db_error()
        })?
        .ok_or_else(|| ApiError::entity_not_found("Workspace"))?;

    Ok(Json(CurrentUserResponse {
        user: user.into(),
        workspace: workspace.into(),
    }))
}

fn issue_tokens(
    state: &AppState,
    conn: &mut diesel::PgConnection,
    user: &User,
) -> ApiResult<TokenResponse> {
    let (session, refresh_token) = SessionStore::issue(
        conn,
        user.id,
        user.workspace_id,
        state.config.auth.refresh_ttl_seconds,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to open session");
        ApiError::internal("Session creation failed", "SESSION_CREATE_ERROR")
    })?;

    let role = crate::auth::Role::parse(&user.role).unwrap_or(crate::auth::Role::Member);

    let access = state
        .jwt_config
        .generate_access_token(user.id, user.workspace_id, role, session.id)
        .map_err(|e| {
            error!(error = %e, "Token generation failed");
            ApiError::internal("Token generation failed", "TOKEN_GENERATION_ERROR")
        })?;

    Ok(TokenResponse {
        access,
        refresh: refresh_token,
        expires_in: state.config.auth.access_ttl_seconds,
    })
}
