#[cfg(test)]
mod tests {
    use crate::db::{assign_invite_code, ensure_invite_code, find_coach_by_invite_code};
    use crate::error::AppError;
    use crate::invite_code::{
        INVITE_CODE_ALPHABET, INVITE_CODE_LENGTH, generate, generate_with, is_well_formed,
        normalize,
    };
    use crate::test::test_db::TestDbBuilder;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_generated_codes_use_the_unambiguous_alphabet() {
        for _ in 0..500 {
            let code = generate();
            assert_eq!(code.len(), INVITE_CODE_LENGTH);
            assert!(
                code.bytes().all(|b| INVITE_CODE_ALPHABET.contains(&b)),
                "Unexpected character in {}",
                code
            );
            assert!(is_well_formed(&code));
        }
    }

    #[test]
    fn test_alphabet_excludes_look_alikes() {
        for ambiguous in [b'0', b'O', b'1', b'I'] {
            assert!(!INVITE_CODE_ALPHABET.contains(&ambiguous));
        }
        assert_eq!(INVITE_CODE_ALPHABET.len(), 32);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let first = generate_with(&mut StdRng::seed_from_u64(7));
        let second = generate_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);
    }

    #[test]
    fn test_normalize_and_format() {
        assert_eq!(normalize("  k7p3qm\n"), "K7P3QM");
        assert!(is_well_formed(" k7p3qm "));
        assert!(is_well_formed("ABCDEF"));

        assert!(!is_well_formed(""));
        assert!(!is_well_formed("K7P3Q"));
        assert!(!is_well_formed("K7P3QMX"));
        assert!(!is_well_formed("K7P3Q0"));
        assert!(!is_well_formed("K7P3QI"));
        assert!(!is_well_formed("K7 P3Q"));
        assert!(!is_well_formed("K7P3Q-"));
    }

    #[tokio::test]
    async fn test_ensure_invite_code_is_stable() {
        let test_db = TestDbBuilder::new()
            .coach("coach_user", Some("Coach Carter"))
            .build()
            .await
            .expect("Failed to build test database");
        let coach_id = test_db.user_id("coach_user").unwrap();
        let assigned = test_db.invite_code("coach_user").unwrap();

        let again = ensure_invite_code(&test_db.pool, coach_id, 10).await.unwrap();
        assert_eq!(again, assigned);
        assert!(is_well_formed(&again));

        let coach = find_coach_by_invite_code(&test_db.pool, &again)
            .await
            .unwrap()
            .expect("Coach should resolve by code");
        assert_eq!(coach.id, coach_id);
    }

    #[tokio::test]
    async fn test_clients_cannot_hold_invite_codes() {
        let test_db = TestDbBuilder::new()
            .client("client_one", None)
            .build()
            .await
            .expect("Failed to build test database");
        let client_id = test_db.user_id("client_one").unwrap();

        let result = ensure_invite_code(&test_db.pool, client_id, 10).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));

        let assigned = assign_invite_code(&test_db.pool, client_id, "ABCDEF")
            .await
            .unwrap();
        assert!(!assigned);
        assert!(
            find_coach_by_invite_code(&test_db.pool, "ABCDEF")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_codes_are_unique_regardless_of_case() {
        let test_db = TestDbBuilder::new()
            .coach_with_code("coach_one", None, "ABCDEF")
            .build()
            .await
            .expect("Failed to build test database");

        let second_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, password, role) VALUES ('coach_two', '', 'coach')
             RETURNING id",
        )
        .fetch_one(&test_db.pool)
        .await
        .unwrap();

        let err = assign_invite_code(&test_db.pool, second_id, "abcdef")
            .await
            .unwrap_err();
        assert!(err.is_unique_violation(), "Unexpected error: {}", err);

        let coach = find_coach_by_invite_code(&test_db.pool, "abcdef")
            .await
            .unwrap()
            .expect("Lookup should ignore case");
        assert_eq!(Some(coach.id), test_db.user_id("coach_one"));
    }

    #[tokio::test]
    async fn test_existing_code_is_not_replaced() {
        let test_db = TestDbBuilder::new()
            .coach_with_code("coach_one", None, "ABCDEF")
            .build()
            .await
            .expect("Failed to build test database");
        let coach_id = test_db.user_id("coach_one").unwrap();

        let replaced = assign_invite_code(&test_db.pool, coach_id, "GHJKLM")
            .await
            .unwrap();
        assert!(!replaced);

        let code = ensure_invite_code(&test_db.pool, coach_id, 10).await.unwrap();
        assert_eq!(code, "ABCDEF");
    }
}
