#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::connections::ConnectionService;
    use crate::db::{assign_invite_code, ensure_invite_code};
    use crate::env::DEFAULT_INVITE_CODE_MAX_ATTEMPTS;
    use crate::error::AppError;
    use once_cell::sync::Lazy;
    use sqlx::{Pool, Sqlite, SqlitePool};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    // Lowest bcrypt cost keeps fixtures fast; verification accepts any cost.
    static STANDARD_PASSWORD_HASH: Lazy<String> =
        Lazy::new(|| bcrypt::hash(STANDARD_PASSWORD, 4).expect("Failed to hash test password"));

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub invite_code: Option<String>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn client(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Client,
                invite_code: None,
            });
            self
        }

        /// A coach with a freshly generated invite code.
        pub fn coach(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Coach,
                invite_code: None,
            });
            self
        }

        pub fn coach_with_code(
            mut self,
            username: &str,
            display_name: Option<&str>,
            invite_code: &str,
        ) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Coach,
                invite_code: Some(invite_code.to_string()),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let pool = SqlitePool::connect("sqlite::memory:").await?;

            crate::run_migrations(&pool)
                .await
                .map_err(|err| AppError::Internal(err.to_string()))?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut invite_code_map: HashMap<String, String> = HashMap::new();

            for user in &self.users {
                let user_id = sqlx::query(
                    "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
                )
                .bind(&user.username)
                .bind(STANDARD_PASSWORD_HASH.as_str())
                .bind(user.role.as_str())
                .bind(user.display_name.as_deref())
                .execute(&pool)
                .await?
                .last_insert_rowid();

                user_id_map.insert(user.username.clone(), user_id);

                if user.role != Role::Coach {
                    continue;
                }

                let code = match &user.invite_code {
                    Some(code) => {
                        assign_invite_code(&pool, user_id, code).await?;
                        code.clone()
                    }
                    None => {
                        ensure_invite_code(&pool, user_id, DEFAULT_INVITE_CODE_MAX_ATTEMPTS)
                            .await?
                    }
                };
                invite_code_map.insert(user.username.clone(), code);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                invite_code_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub invite_code_map: HashMap<String, String>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn invite_code(&self, coach_username: &str) -> Option<String> {
            self.invite_code_map.get(coach_username).cloned()
        }

        pub fn service(&self) -> ConnectionService {
            ConnectionService::new(self.pool.clone())
        }

        pub async fn connection_count(&self) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar("SELECT COUNT(*) FROM connections")
                .fetch_one(&self.pool)
                .await
        }

        pub async fn pair_count(&self, coach_id: i64, client_id: i64) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM connections WHERE coach_id = ? AND client_id = ?",
            )
            .bind(coach_id)
            .bind(client_id)
            .fetch_one(&self.pool)
            .await
        }
    }

    /// Coach `coach_user` (code `K7P3QM`) and clients `client_one`, `client_two`.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .coach_with_code("coach_user", Some("Coach Carter"), "K7P3QM")
            .client("client_one", Some("Client One"))
            .client("client_two", Some("Client Two"))
            .build()
            .await
            .expect("Failed to build test database")
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::test_db::{STANDARD_PASSWORD, TestDb};
    use crate::api::LoginResponse;
    use crate::env::AppConfig;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    pub use super::test_db::create_standard_test_db;

    /// Cookies are not kept between requests; tests authenticate with a bearer
    /// token so several users can share one client.
    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = crate::init_rocket(test_db.pool.clone(), AppConfig::default());
        let client = Client::untracked(rocket)
            .await
            .expect("Failed to create test client");

        (client, test_db)
    }

    /// Logs in with the standard fixture password and returns the session token.
    pub async fn login_test_user(client: &Client, username: &str) -> String {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.expect("Empty login response");
        let login: LoginResponse = serde_json::from_str(&body).expect("Malformed login response");
        assert!(login.success, "Login failed for {}", username);

        login.token.expect("Login response without token")
    }

    pub fn bearer(token: &str) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", token))
    }
}
