//! Coach-client connection lifecycle.
//!
//! Every operation takes the caller's identity explicitly and reports
//! failures as a [`ConnectionError`] whose kind callers can match on. Store
//! errors are logged and folded into [`ConnectionErrorKind::InternalError`].
//!
//! Mutations run in a single SQLite transaction. SQLite admits one writer at
//! a time, so writers inside this process also queue on `write_lock`; the
//! `UNIQUE (coach_id, client_id)` constraint still guards against duplicate
//! rows from any other writer.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::auth::{Role, User};
use crate::db;
use crate::error::{ConnectionError, ConnectionErrorKind, ConnectionResult};
use crate::invite_code;
use crate::models::{
    CoachPreview, ConnectOutcome, ConnectionStatus, ConnectionSummary, DisconnectOutcome,
    MyConnections, RespondOutcome,
};

#[derive(Clone)]
pub struct ConnectionService {
    pool: Pool<Sqlite>,
    write_lock: Arc<Mutex<()>>,
}

impl ConnectionService {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn caller(&self, caller_id: Option<i64>) -> ConnectionResult<User> {
        let caller_id = caller_id.ok_or_else(ConnectionError::not_authenticated)?;
        db::find_user(&self.pool, caller_id)
            .await?
            .ok_or_else(ConnectionError::not_authenticated)
    }

    async fn resolve_coach(&self, raw_code: &str) -> ConnectionResult<User> {
        if !invite_code::is_well_formed(raw_code) {
            return Err(ConnectionError::invalid_code());
        }

        let code = invite_code::normalize(raw_code);
        db::find_coach_by_invite_code(&self.pool, &code)
            .await?
            .ok_or_else(ConnectionError::invalid_code)
    }

    /// Client-initiated request to connect with the coach owning `invite_code`.
    ///
    /// A previously declined request for the same pair is reopened in place
    /// rather than duplicated.
    #[instrument(skip(self, invite_code))]
    pub async fn connect_by_invite_code(
        &self,
        requesting_client_id: Option<i64>,
        invite_code: &str,
    ) -> ConnectionResult<ConnectOutcome> {
        let client = self.caller(requesting_client_id).await?;
        let coach = self.resolve_coach(invite_code).await?;

        if coach.id == client.id {
            return Err(ConnectionError::new(
                ConnectionErrorKind::SelfConnection,
                "You cannot connect to yourself",
            ));
        }

        // Listings pick rows by role, so only clients may request
        if client.role != Role::Client {
            warn!(user_id = client.id, "Connection request from a non-client");
            return Err(ConnectionError::new(
                ConnectionErrorKind::NotAuthenticated,
                "Only clients can request a coach",
            ));
        }

        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        if let Some(connection_id) =
            db::reopen_declined_connection(&mut *tx, coach.id, client.id, now).await?
        {
            tx.commit().await?;
            info!(
                connection_id,
                coach_id = coach.id,
                client_id = client.id,
                "Reopened declined connection request"
            );
            return Ok(ConnectOutcome {
                connection_id,
                coach_display_name: coach.display_name,
                reopened: true,
            });
        }

        if let Some(connection_id) =
            db::insert_pending_connection(&mut *tx, coach.id, client.id, now).await?
        {
            tx.commit().await?;
            info!(
                connection_id,
                coach_id = coach.id,
                client_id = client.id,
                "Created connection request"
            );
            return Ok(ConnectOutcome {
                connection_id,
                coach_display_name: coach.display_name,
                reopened: false,
            });
        }

        let existing = db::get_connection_for_pair(&mut *tx, coach.id, client.id).await?;
        tx.rollback().await?;

        match existing.map(|connection| connection.status) {
            Some(ConnectionStatus::Accepted) => Err(ConnectionError::new(
                ConnectionErrorKind::AlreadyConnected,
                format!("Already connected to {}", coach.display_name),
            )),
            Some(ConnectionStatus::Pending) => Err(ConnectionError::new(
                ConnectionErrorKind::RequestPending,
                format!("A request to {} is already pending", coach.display_name),
            )),
            // Both writes were no-ops, so the row must exist and not be declined
            Some(ConnectionStatus::Declined) | None => Err(ConnectionError::new(
                ConnectionErrorKind::InternalError,
                "Connection changed while the request was being made",
            )),
        }
    }

    /// Coach accepts or declines a pending request addressed to them.
    #[instrument(skip(self))]
    pub async fn respond_to_connection(
        &self,
        responding_coach_id: Option<i64>,
        connection_id: i64,
        accept: bool,
    ) -> ConnectionResult<RespondOutcome> {
        let coach_id = responding_coach_id.ok_or_else(ConnectionError::not_authenticated)?;
        let status = if accept {
            ConnectionStatus::Accepted
        } else {
            ConnectionStatus::Declined
        };

        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        if let Some(updated) =
            db::respond_pending_connection(&mut *tx, connection_id, coach_id, status, now).await?
        {
            tx.commit().await?;
            info!(
                connection_id,
                coach_id,
                status = %updated.status,
                "Responded to connection request"
            );
            return Ok(RespondOutcome {
                connection_id: updated.id,
                status: updated.status,
                responded_at: updated.responded_at,
            });
        }

        let existing = db::get_connection_for_coach(&mut *tx, connection_id, coach_id).await?;
        tx.rollback().await?;

        match existing {
            Some(connection) => Err(ConnectionError::new(
                ConnectionErrorKind::AlreadyResponded,
                format!("Connection already {}", connection.status),
            )),
            None => Err(ConnectionError::not_found()),
        }
    }

    /// The caller's connections, shaped for the caller's role.
    #[instrument(skip(self))]
    pub async fn list_my_connections(&self, user_id: Option<i64>) -> ConnectionResult<MyConnections> {
        let user = self.caller(user_id).await?;

        let mut connections = match user.role {
            Role::Coach => db::list_coach_connections(&self.pool, user.id).await?,
            Role::Client => db::list_client_connections(&self.pool, user.id).await?,
        };
        order_for_role(user.role, &mut connections);

        Ok(MyConnections {
            role: user.role,
            connections,
        })
    }

    /// Hard-deletes a connection. Either party may disconnect.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        user_id: Option<i64>,
        connection_id: i64,
    ) -> ConnectionResult<DisconnectOutcome> {
        let user_id = user_id.ok_or_else(ConnectionError::not_authenticated)?;

        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if !db::delete_connection_for_participant(&mut *tx, connection_id, user_id).await? {
            tx.rollback().await?;
            return Err(ConnectionError::not_found());
        }

        tx.commit().await?;
        info!(connection_id, user_id, "Connection removed");
        Ok(DisconnectOutcome { connection_id })
    }

    /// Public card of the coach behind an invite code.
    #[instrument(skip(self, invite_code))]
    pub async fn preview_coach_by_invite_code(
        &self,
        invite_code: &str,
    ) -> ConnectionResult<CoachPreview> {
        let coach = self.resolve_coach(invite_code).await?;

        Ok(CoachPreview {
            coach_id: coach.id,
            display_name: coach.display_name,
            avatar_url: coach.avatar_url,
            bio: coach.bio,
        })
    }

    /// Whether `coach_id` currently coaches `client_id`.
    #[instrument(skip(self))]
    pub async fn is_coaching(&self, coach_id: i64, client_id: i64) -> ConnectionResult<bool> {
        Ok(db::has_accepted_connection(&self.pool, coach_id, client_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn list_active_clients(
        &self,
        coach_id: Option<i64>,
    ) -> ConnectionResult<Vec<ConnectionSummary>> {
        let coach = self.coach(coach_id).await?;

        let mut clients: Vec<ConnectionSummary> = db::list_coach_connections(&self.pool, coach.id)
            .await?
            .into_iter()
            .filter(|connection| connection.status == ConnectionStatus::Accepted)
            .collect();
        order_for_role(Role::Client, &mut clients);

        Ok(clients)
    }

    #[instrument(skip(self))]
    pub async fn pending_request_count(&self, coach_id: Option<i64>) -> ConnectionResult<i64> {
        let coach = self.coach(coach_id).await?;
        Ok(db::count_pending_connections(&self.pool, coach.id).await?)
    }

    async fn coach(&self, coach_id: Option<i64>) -> ConnectionResult<User> {
        let user = self.caller(coach_id).await?;
        if !user.is_coach() {
            warn!(user_id = user.id, "Coach-only operation called by a client");
            return Err(ConnectionError::new(
                ConnectionErrorKind::NotAuthenticated,
                "Only coaches can do this",
            ));
        }
        Ok(user)
    }
}

/// Coaches see pending requests first, then everything else, newest request
/// first within each group. Clients see the most recent response first with
/// unanswered requests last.
pub fn order_for_role(role: Role, connections: &mut [ConnectionSummary]) {
    match role {
        Role::Coach => connections.sort_by(|a, b| {
            let a_pending = a.status == ConnectionStatus::Pending;
            let b_pending = b.status == ConnectionStatus::Pending;
            b_pending
                .cmp(&a_pending)
                .then_with(|| b.requested_at.cmp(&a.requested_at))
        }),
        Role::Client => connections.sort_by(|a, b| {
            let by_response = match (a.responded_at, b.responded_at) {
                (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_response.then_with(|| b.requested_at.cmp(&a.requested_at))
        }),
    }
}
