#[cfg(test)]
mod tests {
    use crate::auth::UserSession;
    use crate::db::{clean_expired_sessions, create_user_session, get_session_by_token};
    use crate::env::DEFAULT_SESSION_TTL_HOURS;
    use crate::error::AppError;
    use crate::test::test_db::{TestDb, TestDbBuilder};
    use crate::test::test_utils::{bearer, login_test_user, setup_test_client};
    use chrono::{Duration, Utc};
    use rocket::http::{Header, Status};

    async fn single_client_db() -> TestDb {
        TestDbBuilder::new()
            .client("session_client", Some("Session Client"))
            .build()
            .await
            .expect("Failed to build test database")
    }

    /// Stores a session for `session_client` that expires `offset` from now.
    async fn seed_session(test_db: &TestDb, offset: Duration) -> String {
        let user_id = test_db.user_id("session_client").unwrap();
        let token = UserSession::generate_token();
        create_user_session(
            &test_db.pool,
            user_id,
            &token,
            (Utc::now() + offset).naive_utc(),
        )
        .await
        .expect("Failed to create session");
        token
    }

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let first = UserSession::generate_token();
        let second = UserSession::generate_token();

        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[rocket::async_test]
    async fn test_login_session_uses_configured_lifetime() {
        let (client, test_db) = setup_test_client(single_client_db().await).await;
        let before = Utc::now();

        let token = login_test_user(&client, "session_client").await;

        let session = get_session_by_token(&test_db.pool, &token)
            .await
            .expect("Login should store a session");
        assert_eq!(Some(session.user_id), test_db.user_id("session_client"));
        assert!(session.is_valid());

        let expected = before + Duration::hours(DEFAULT_SESSION_TTL_HOURS);
        let drift = (session.expires_at.and_utc() - expected).num_seconds().abs();
        assert!(drift <= 60, "Expiry is {}s away from the configured TTL", drift);
    }

    #[rocket::async_test]
    async fn test_bearer_token_resolves_user() {
        let (client, test_db) = setup_test_client(single_client_db().await).await;
        let token = seed_session(&test_db, Duration::hours(1)).await;

        let response = client.get("/api/me").header(bearer(&token)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        assert!(body.contains("\"username\":\"session_client\""));

        for header in ["Bearer ", "Basic abc", "Bearer    "] {
            let response = client
                .get("/api/me")
                .header(Header::new("Authorization", header))
                .dispatch()
                .await;
            assert_eq!(response.status(), Status::Unauthorized, "header {:?}", header);
        }
    }

    #[rocket::async_test]
    async fn test_expired_session_is_rejected_but_can_log_out() {
        let (client, test_db) = setup_test_client(single_client_db().await).await;
        let token = seed_session(&test_db, Duration::hours(-1)).await;

        let response = client.get("/api/me").header(bearer(&token)).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);

        let response = client
            .post("/api/logout")
            .header(bearer(&token))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NoContent);

        let result = get_session_by_token(&test_db.pool, &token).await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }

    #[rocket::async_test]
    async fn test_logout_without_session_is_harmless() {
        let (client, _) = setup_test_client(single_client_db().await).await;

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::NoContent);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_sessions() {
        let test_db = single_client_db().await;
        let expired = seed_session(&test_db, Duration::minutes(-5)).await;
        let live = seed_session(&test_db, Duration::hours(2)).await;

        let removed = clean_expired_sessions(&test_db.pool)
            .await
            .expect("Sweep should succeed");
        assert_eq!(removed, 1);

        assert!(get_session_by_token(&test_db.pool, &expired).await.is_err());
        assert!(get_session_by_token(&test_db.pool, &live).await.is_ok());

        let removed = clean_expired_sessions(&test_db.pool).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_sessions_removed_with_user() {
        let test_db = single_client_db().await;
        let token = seed_session(&test_db, Duration::hours(1)).await;

        sqlx::query("DELETE FROM users WHERE username = 'session_client'")
            .execute(&test_db.pool)
            .await
            .expect("Failed to delete user");

        let result = get_session_by_token(&test_db.pool, &token).await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
    }
}
