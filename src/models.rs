use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::auth::Role;
use crate::error::AppError;

pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Declined,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Accepted => "accepted",
            ConnectionStatus::Declined => "declined",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConnectionStatus::Pending),
            "accepted" => Ok(ConnectionStatus::Accepted),
            "declined" => Ok(ConnectionStatus::Declined),
            other => Err(AppError::Internal(format!(
                "Unknown connection status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: i64,
    pub coach_id: i64,
    pub client_id: i64,
    pub status: ConnectionStatus,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbConnection {
    pub id: Option<i64>,
    pub coach_id: Option<i64>,
    pub client_id: Option<i64>,
    pub status: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbConnection> for Connection {
    type Error = AppError;

    fn try_from(db: DbConnection) -> Result<Self, Self::Error> {
        let requested_at = db.requested_at.unwrap_or_else(Utc::now);
        Ok(Self {
            id: db.id.unwrap_or_default(),
            coach_id: db.coach_id.unwrap_or_default(),
            client_id: db.client_id.unwrap_or_default(),
            status: db.status.unwrap_or_default().parse()?,
            requested_at,
            responded_at: db.responded_at,
            updated_at: db.updated_at.unwrap_or(requested_at),
        })
    }
}

/// The other party of a connection, as seen by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counterpart {
    pub id: i64,
    pub role: Role,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub id: i64,
    pub coach_id: i64,
    pub client_id: i64,
    pub status: ConnectionStatus,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub counterpart: Counterpart,
}

/// A connection row joined with the counterpart's profile columns.
/// Profile columns are optional so a missing profile never fails a listing.
#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbConnectionWithProfile {
    pub id: Option<i64>,
    pub coach_id: Option<i64>,
    pub client_id: Option<i64>,
    pub status: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub counterpart_id: Option<i64>,
    pub counterpart_username: Option<String>,
    pub counterpart_display_name: Option<String>,
    pub counterpart_avatar_url: Option<String>,
}

impl DbConnectionWithProfile {
    /// `counterpart_role` is the role of the joined profile: clients for a
    /// coach's listing, coaches for a client's.
    pub fn into_summary(self, counterpart_role: Role) -> Result<ConnectionSummary, AppError> {
        let display_name = self
            .counterpart_display_name
            .filter(|name| !name.trim().is_empty())
            .or(self.counterpart_username.filter(|name| !name.trim().is_empty()))
            .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string());

        Ok(ConnectionSummary {
            id: self.id.unwrap_or_default(),
            coach_id: self.coach_id.unwrap_or_default(),
            client_id: self.client_id.unwrap_or_default(),
            status: self.status.unwrap_or_default().parse()?,
            requested_at: self.requested_at.unwrap_or_else(Utc::now),
            responded_at: self.responded_at,
            counterpart: Counterpart {
                id: self.counterpart_id.unwrap_or_default(),
                role: counterpart_role,
                display_name,
                avatar_url: self.counterpart_avatar_url,
            },
        })
    }
}

/// Public card of a coach shown before a client sends a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoachPreview {
    pub coach_id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub connection_id: i64,
    pub coach_display_name: String,
    pub reopened: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondOutcome {
    pub connection_id: i64,
    pub status: ConnectionStatus,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyConnections {
    pub role: Role,
    pub connections: Vec<ConnectionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub connection_id: i64,
}
