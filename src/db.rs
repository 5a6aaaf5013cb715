use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
    invite_code,
    models::{
        Connection, ConnectionStatus, ConnectionSummary, DbConnection, DbConnectionWithProfile,
    },
};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

const USER_COLUMNS: &str = "id, username, role, display_name, avatar_url, bio, invite_code";

const CONNECTION_COLUMNS: &str =
    "id, coach_id, client_id, status, requested_at, responded_at, updated_at";

// Profiles

#[instrument(skip(pool))]
pub async fn find_user(pool: &Pool<Sqlite>, id: i64) -> Result<Option<User>, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    match find_user(pool, id).await? {
        Some(user) => Ok(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip(pool, password))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role.as_str())
    .bind(display_name)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash: Option<(i64, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some((user_id, hash)) = hash else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hash) {
        Ok(true) => find_user(pool, user_id).await,
        Ok(false) => Ok(None),
        Err(err) => {
            warn!(error = %err, "Stored password hash could not be verified");
            Ok(None)
        }
    }
}

#[instrument(skip(pool))]
pub async fn update_user_profile(
    pool: &Pool<Sqlite>,
    user_id: i64,
    display_name: Option<&str>,
    avatar_url: Option<&str>,
    bio: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating user profile");
    sqlx::query(
        "UPDATE users
         SET display_name = COALESCE(?, display_name),
             avatar_url = COALESCE(?, avatar_url),
             bio = COALESCE(?, bio)
         WHERE id = ?",
    )
    .bind(display_name)
    .bind(avatar_url)
    .bind(bio)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Resolves an invite code to a coach. Expects a normalized code; the
/// column collation makes the comparison case-insensitive regardless.
#[instrument(skip(pool))]
pub async fn find_coach_by_invite_code(
    pool: &Pool<Sqlite>,
    code: &str,
) -> Result<Option<User>, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE invite_code = ? AND role = 'coach'"
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

/// Stores `code` for the coach unless one is already assigned.
#[instrument(skip(pool))]
pub async fn assign_invite_code(
    pool: &Pool<Sqlite>,
    coach_id: i64,
    code: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE users SET invite_code = ?
         WHERE id = ? AND role = 'coach' AND invite_code IS NULL",
    )
    .bind(code)
    .bind(coach_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns the coach's invite code, allocating one on first use. Collisions
/// with another coach's code are retried with a fresh code.
#[instrument(skip(pool))]
pub async fn ensure_invite_code(
    pool: &Pool<Sqlite>,
    coach_id: i64,
    max_attempts: u32,
) -> Result<String, AppError> {
    let coach = get_user(pool, coach_id).await?;
    if coach.role != Role::Coach {
        return Err(AppError::Authorization(format!(
            "User {} is not a coach and cannot have an invite code",
            coach_id
        )));
    }

    if let Some(code) = coach.invite_code {
        return Ok(code);
    }

    for attempt in 1..=max_attempts.max(1) {
        let candidate = invite_code::generate();
        match assign_invite_code(pool, coach_id, &candidate).await {
            Ok(true) => {
                info!(attempt, "Assigned invite code");
                return Ok(candidate);
            }
            // Someone else assigned a code in the meantime; that one wins
            Ok(false) => {
                return get_user(pool, coach_id).await?.invite_code.ok_or_else(|| {
                    AppError::Internal(format!("Coach {} lost its invite code", coach_id))
                });
            }
            Err(err) if err.is_unique_violation() => {
                warn!(attempt, "Invite code collision, regenerating");
            }
            Err(err) => return Err(err),
        }
    }

    Err(AppError::Internal(format!(
        "Could not allocate a unique invite code after {} attempts",
        max_attempts
    )))
}

// Sessions

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// Connections

/// Flips a declined row for the pair back to pending. Returns the row id
/// when a declined row existed.
#[instrument(skip(conn))]
pub async fn reopen_declined_connection(
    conn: &mut SqliteConnection,
    coach_id: i64,
    client_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<i64>, AppError> {
    let id: Option<i64> = sqlx::query_scalar(
        "UPDATE connections
         SET status = 'pending', responded_at = NULL, updated_at = ?
         WHERE coach_id = ? AND client_id = ? AND status = 'declined'
         RETURNING id",
    )
    .bind(now)
    .bind(coach_id)
    .bind(client_id)
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

/// Inserts a pending row for the pair. Returns `None` when a row for the
/// pair already exists; the unique constraint makes this race free.
#[instrument(skip(conn))]
pub async fn insert_pending_connection(
    conn: &mut SqliteConnection,
    coach_id: i64,
    client_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<i64>, AppError> {
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO connections (coach_id, client_id, status, requested_at, updated_at)
         VALUES (?, ?, 'pending', ?, ?)
         ON CONFLICT (coach_id, client_id) DO NOTHING
         RETURNING id",
    )
    .bind(coach_id)
    .bind(client_id)
    .bind(now)
    .bind(now)
    .fetch_optional(conn)
    .await?;

    Ok(id)
}

#[instrument(skip(conn))]
pub async fn get_connection_for_pair(
    conn: &mut SqliteConnection,
    coach_id: i64,
    client_id: i64,
) -> Result<Option<Connection>, AppError> {
    let row = sqlx::query_as::<_, DbConnection>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections WHERE coach_id = ? AND client_id = ?"
    ))
    .bind(coach_id)
    .bind(client_id)
    .fetch_optional(conn)
    .await?;

    row.map(Connection::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_connection(
    pool: &Pool<Sqlite>,
    connection_id: i64,
) -> Result<Option<Connection>, AppError> {
    let row = sqlx::query_as::<_, DbConnection>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?"
    ))
    .bind(connection_id)
    .fetch_optional(pool)
    .await?;

    row.map(Connection::try_from).transpose()
}

#[instrument(skip(conn))]
pub async fn get_connection_for_coach(
    conn: &mut SqliteConnection,
    connection_id: i64,
    coach_id: i64,
) -> Result<Option<Connection>, AppError> {
    let row = sqlx::query_as::<_, DbConnection>(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ? AND coach_id = ?"
    ))
    .bind(connection_id)
    .bind(coach_id)
    .fetch_optional(conn)
    .await?;

    row.map(Connection::try_from).transpose()
}

/// Moves a pending row owned by `coach_id` to `status`. Rows that are not
/// pending, or belong to another coach, are left untouched and yield `None`.
#[instrument(skip(conn))]
pub async fn respond_pending_connection(
    conn: &mut SqliteConnection,
    connection_id: i64,
    coach_id: i64,
    status: ConnectionStatus,
    now: DateTime<Utc>,
) -> Result<Option<Connection>, AppError> {
    let row = sqlx::query_as::<_, DbConnection>(&format!(
        "UPDATE connections
         SET status = ?, responded_at = ?, updated_at = ?
         WHERE id = ? AND coach_id = ? AND status = 'pending'
         RETURNING {CONNECTION_COLUMNS}"
    ))
    .bind(status.as_str())
    .bind(now)
    .bind(now)
    .bind(connection_id)
    .bind(coach_id)
    .fetch_optional(conn)
    .await?;

    row.map(Connection::try_from).transpose()
}

/// Hard-deletes the row if `user_id` is either party on it.
#[instrument(skip(conn))]
pub async fn delete_connection_for_participant(
    conn: &mut SqliteConnection,
    connection_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    let result =
        sqlx::query("DELETE FROM connections WHERE id = ? AND (coach_id = ? OR client_id = ?)")
            .bind(connection_id)
            .bind(user_id)
            .bind(user_id)
            .execute(conn)
            .await?;

    Ok(result.rows_affected() > 0)
}

#[instrument(skip(pool))]
pub async fn list_coach_connections(
    pool: &Pool<Sqlite>,
    coach_id: i64,
) -> Result<Vec<ConnectionSummary>, AppError> {
    info!("Listing connections for coach");
    let rows = sqlx::query_as::<_, DbConnectionWithProfile>(
        "SELECT c.id, c.coach_id, c.client_id, c.status, c.requested_at, c.responded_at,
                c.updated_at, c.client_id AS counterpart_id,
                u.username AS counterpart_username,
                u.display_name AS counterpart_display_name,
                u.avatar_url AS counterpart_avatar_url
         FROM connections c
         LEFT JOIN users u ON u.id = c.client_id
         WHERE c.coach_id = ?",
    )
    .bind(coach_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| row.into_summary(Role::Client))
        .collect()
}

#[instrument(skip(pool))]
pub async fn list_client_connections(
    pool: &Pool<Sqlite>,
    client_id: i64,
) -> Result<Vec<ConnectionSummary>, AppError> {
    info!("Listing connections for client");
    let rows = sqlx::query_as::<_, DbConnectionWithProfile>(
        "SELECT c.id, c.coach_id, c.client_id, c.status, c.requested_at, c.responded_at,
                c.updated_at, c.coach_id AS counterpart_id,
                u.username AS counterpart_username,
                u.display_name AS counterpart_display_name,
                u.avatar_url AS counterpart_avatar_url
         FROM connections c
         LEFT JOIN users u ON u.id = c.coach_id
         WHERE c.client_id = ?",
    )
    .bind(client_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| row.into_summary(Role::Coach))
        .collect()
}

#[instrument(skip(pool))]
pub async fn has_accepted_connection(
    pool: &Pool<Sqlite>,
    coach_id: i64,
    client_id: i64,
) -> Result<bool, AppError> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM connections
         WHERE coach_id = ? AND client_id = ? AND status = 'accepted'",
    )
    .bind(coach_id)
    .bind(client_id)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}

#[instrument(skip(pool))]
pub async fn count_pending_connections(
    pool: &Pool<Sqlite>,
    coach_id: i64,
) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM connections WHERE coach_id = ? AND status = 'pending'",
    )
    .bind(coach_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
