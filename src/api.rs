use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::auth::{Permission, Role, SESSION_COOKIE, SessionToken, User, UserSession};
use crate::connections::ConnectionService;
use crate::db::{
    authenticate_user, create_user, create_user_session, ensure_invite_code,
    find_user_by_username, get_user, invalidate_session, update_user_profile,
};
use crate::env::AppConfig;
use crate::error::ConnectionResult;
use crate::models::{
    CoachPreview, ConnectOutcome, ConnectionSummary, DisconnectOutcome, MyConnections,
    RespondOutcome,
};
use crate::validation::{
    ApiValidationError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse,
};

/// Body of every successful connection call: `{"success": true, ...payload}`.
#[derive(Serialize, Deserialize, Debug)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub payload: T,
}

type ApiResult<T> = ConnectionResult<Json<Success<T>>>;

fn success<T>(payload: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        payload,
    })
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub invite_code: Option<String>,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role,
            avatar_url: user.avatar_url,
            bio: user.bio,
            invite_code: user.invite_code,
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: Option<String>,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiValidationError> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = config.session_expiry(Utc::now()).ok_or_else(|| {
                Custom(
                    Status::InternalServerError,
                    Json(ValidationResponse::with_error(
                        "server",
                        "Session lifetime is misconfigured",
                    )),
                )
            })?;

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
                .same_site(SameSite::Lax)
                .http_only(true)
                .max_age(rocket::time::Duration::seconds(
                    config.session_ttl().num_seconds(),
                ));
            cookies.add_private(cookie);

            info!(user_id = user.id, "User logged in");

            Ok(Json(LoginResponse {
                success: true,
                token: Some(token),
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            token: None,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(
    token: SessionToken,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Status {
    if let Some(token) = token.0 {
        let _ = invalidate_session(db, &token).await;
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::NoContent
}

fn validate_role(role: &str) -> Result<(), ValidationError> {
    match Role::from_str(role) {
        Ok(_) => Ok(()),
        Err(_) => {
            let mut error = ValidationError::new("role");
            error.message = Some("Role must be either 'coach' or 'client'".into());
            Err(error)
        }
    }
}

#[derive(Deserialize, Validate)]
pub struct UserRegistrationRequest {
    #[validate(length(
        min = 3,
        max = 32,
        message = "Username must be between 3 and 32 characters"
    ))]
    username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(custom(function = "validate_role"))]
    role: String,
    #[validate(length(min = 1, max = 64, message = "Display name must be 1 to 64 characters"))]
    display_name: Option<String>,
}

#[post("/register", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<UserRegistrationRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Custom<Json<UserData>>, ApiValidationError> {
    let validated = registration.validate_custom()?;

    let existing_user = find_user_by_username(db, &validated.username)
        .await
        .validate_custom()?;

    if existing_user.is_some() {
        return Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ));
    }

    let role = Role::from_str(&validated.role).map_err(|_| {
        Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error("role", "Unknown role")),
        )
    })?;

    let user_id = create_user(
        db,
        &validated.username,
        &validated.password,
        role,
        validated.display_name.as_deref(),
    )
    .await
    .validate_custom()?;

    if role == Role::Coach {
        ensure_invite_code(db, user_id, config.invite_code_max_attempts)
            .await
            .validate_custom()?;
    }

    let user = get_user(db, user_id).await.validate_custom()?;

    Ok(Custom(Status::Created, Json(UserData::from(user))))
}

#[get("/me")]
pub async fn api_me(user: User) -> Result<Json<UserData>, ApiValidationError> {
    user.require_permission(Permission::ViewOwnProfile)
        .validate_custom()?;
    Ok(Json(UserData::from(user)))
}

#[derive(Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(length(min = 1, max = 64, message = "Display name must be 1 to 64 characters"))]
    display_name: Option<String>,
    #[validate(url(message = "Avatar must be a valid URL"))]
    avatar_url: Option<String>,
    #[validate(length(max = 500, message = "Bio must be at most 500 characters"))]
    bio: Option<String>,
}

#[put("/profile", data = "<profile>")]
pub async fn api_update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserData>, ApiValidationError> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;
    let validated = profile.validate_custom()?;

    update_user_profile(
        db,
        user.id,
        validated.display_name.as_deref(),
        validated.avatar_url.as_deref(),
        validated.bio.as_deref(),
    )
    .await
    .validate_custom()?;

    let updated = get_user(db, user.id).await.validate_custom()?;
    Ok(Json(UserData::from(updated)))
}

#[derive(Serialize, Deserialize)]
pub struct InviteCodeResponse {
    pub invite_code: String,
}

#[get("/me/invite-code")]
pub async fn api_get_invite_code(
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<InviteCodeResponse>, ApiValidationError> {
    user.require_permission(Permission::ShareInviteCode)
        .validate_custom()?;

    let invite_code = ensure_invite_code(db, user.id, config.invite_code_max_attempts)
        .await
        .validate_custom()?;

    Ok(Json(InviteCodeResponse { invite_code }))
}

#[get("/coaches/preview/<code>")]
pub async fn api_preview_coach(
    code: &str,
    service: &State<ConnectionService>,
) -> ApiResult<CoachPreview> {
    let preview = service.preview_coach_by_invite_code(code).await?;
    Ok(success(preview))
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    invite_code: String,
}

#[post("/connections", data = "<request>")]
pub async fn api_connect(
    request: Json<ConnectRequest>,
    user: User,
    service: &State<ConnectionService>,
) -> ApiResult<ConnectOutcome> {
    let outcome = service
        .connect_by_invite_code(Some(user.id), &request.invite_code)
        .await?;
    Ok(success(outcome))
}

#[derive(Deserialize)]
pub struct RespondRequest {
    accept: bool,
}

#[post("/connections/<id>/respond", data = "<request>")]
pub async fn api_respond(
    id: i64,
    request: Json<RespondRequest>,
    user: User,
    service: &State<ConnectionService>,
) -> ApiResult<RespondOutcome> {
    let outcome = service
        .respond_to_connection(Some(user.id), id, request.accept)
        .await?;
    Ok(success(outcome))
}

#[get("/connections")]
pub async fn api_list_connections(
    user: User,
    service: &State<ConnectionService>,
) -> ApiResult<MyConnections> {
    let connections = service.list_my_connections(Some(user.id)).await?;
    Ok(success(connections))
}

#[delete("/connections/<id>")]
pub async fn api_disconnect(
    id: i64,
    user: User,
    service: &State<ConnectionService>,
) -> ApiResult<DisconnectOutcome> {
    let outcome = service.disconnect(Some(user.id), id).await?;
    Ok(success(outcome))
}

#[derive(Serialize, Deserialize)]
pub struct ClientsResponse {
    pub clients: Vec<ConnectionSummary>,
}

#[get("/coach/clients")]
pub async fn api_active_clients(
    user: User,
    service: &State<ConnectionService>,
) -> ApiResult<ClientsResponse> {
    let clients = service.list_active_clients(Some(user.id)).await?;
    Ok(success(ClientsResponse { clients }))
}

#[derive(Serialize, Deserialize)]
pub struct PendingCountResponse {
    pub count: i64,
}

#[get("/coach/pending-count")]
pub async fn api_pending_count(
    user: User,
    service: &State<ConnectionService>,
) -> ApiResult<PendingCountResponse> {
    let count = service.pending_request_count(Some(user.id)).await?;
    Ok(success(PendingCountResponse { count }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
