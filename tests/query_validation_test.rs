//! Integration tests for read-only SQL validation.
//!
//! Tests verify that:
//! - Every allow-listed keyword passes, in any case and after any whitespace
//! - Write and DDL statements are rejected with a validation error
//! - Random and hostile input never panics and is never allowed by accident
//! - Cleaning model output is idempotent

use rand::Rng;
use rand::distributions::Alphanumeric;
use sql_pilot::error::DbError;
use sql_pilot::service::SqlSafetyValidator;

const ALLOWED: [&str; 6] = ["SELECT", "SHOW", "DESC", "DESCRIBE", "EXPLAIN", "WITH"];

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_case(word: &str) -> String {
    let mut rng = rand::thread_rng();
    word.chars()
        .map(|c| {
            if rng.gen_bool(0.5) {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect()
}

fn random_whitespace(max: usize) -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(0..=max);
    (0..len)
        .map(|_| [' ', '\t', '\n', '\r'][rng.gen_range(0..4)])
        .collect()
}

fn edge_case_strings() -> Vec<String> {
    vec![
        String::new(),
        " ".to_string(),
        "\n\r\t".to_string(),
        "\0".to_string(),
        "🚀".repeat(100),
        "'OR 1=1--".to_string(),
        "'; DROP TABLE users--".to_string(),
        "-- SELECT\nDELETE FROM users".to_string(),
        "/* SELECT */ DELETE FROM users".to_string(),
        "(SELECT 1)".to_string(),
        "SELECT".to_string(),
        "SELECT;".to_string(),
        "SELECTED * FROM users".to_string(),
        "WITHOUT ROWID".to_string(),
        "a".repeat(100_000),
        "\x00\x01\x02".to_string(),
    ]
}

#[test]
fn test_rejects_writes_and_ddl() {
    for sql in [
        "INSERT INTO users (name) VALUES ('test')",
        "UPDATE users SET name = 'changed' WHERE id = 1",
        "DELETE FROM users WHERE id = 1",
        "CREATE TABLE test (id INT PRIMARY KEY)",
        "DROP TABLE users",
        "ALTER TABLE users ADD COLUMN age INT",
        "TRUNCATE users",
        "GRANT ALL ON users TO public",
        "MERGE INTO users USING src ON (1 = 1)",
        "CALL refresh()",
        "SET SESSION sql_mode = ''",
    ] {
        let err = SqlSafetyValidator::validate(sql).unwrap_err();
        assert!(
            matches!(err, DbError::Validation { .. }),
            "{sql} should be a validation error, got: {err:?}"
        );
    }
}

#[test]
fn test_allows_complex_reads() {
    let sql = r#"
        SELECT u.name, o.total
        FROM users u
        JOIN orders o ON u.id = o.user_id
        WHERE o.created_at > '2024-01-01'
        ORDER BY o.total DESC
    "#;
    let validated = SqlSafetyValidator::validate(sql).unwrap();
    assert_eq!(validated.as_str(), sql);

    let cte = "WITH recent AS (SELECT * FROM orders WHERE total > 10)\nSELECT count(*) FROM recent";
    assert!(SqlSafetyValidator::validate(cte).is_ok());
    assert!(SqlSafetyValidator::validate("EXPLAIN ANALYZE SELECT 1").is_ok());
    assert!(SqlSafetyValidator::validate("SHOW TABLES").is_ok());
}

#[test]
fn test_keyword_prefix_is_not_inspected_further() {
    // Only the leading keyword is checked; the session hint covers the rest
    assert!(SqlSafetyValidator::validate("WITH d AS (DELETE FROM users RETURNING *) SELECT * FROM d").is_ok());
    assert!(SqlSafetyValidator::validate("SELECT 1; DROP TABLE users").is_ok());
}

#[test]
fn fuzz_allowed_keyword_with_random_spacing_and_case() {
    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        let keyword = ALLOWED[rng.gen_range(0..ALLOWED.len())];
        let sql = format!(
            "{}{}{}{}",
            random_whitespace(4),
            random_case(keyword),
            [" ", "\t", "\n", "\r\n"][rng.gen_range(0..4)],
            random_string(rng.gen_range(0..64))
        );
        let verdict = SqlSafetyValidator::classify(&sql);
        assert!(verdict.allowed, "{sql:?} should be allowed");
        assert_eq!(verdict.reason, None);
    }
}

#[test]
fn fuzz_random_text_is_denied_unless_it_starts_with_a_keyword() {
    for _ in 0..1000 {
        let len = rand::thread_rng().gen_range(0..40);
        let sql = random_string(len);
        let first_word = sql.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
        let verdict = SqlSafetyValidator::classify(&sql);
        if !ALLOWED.contains(&first_word.as_str()) {
            assert!(!verdict.allowed, "{sql:?} should be denied");
            assert!(verdict.reason.is_some());
        }
    }
}

#[test]
fn fuzz_edge_cases_never_panic_or_pass() {
    for sql in edge_case_strings() {
        let verdict = SqlSafetyValidator::classify(&sql);
        let preview: String = sql.chars().take(40).collect();
        assert!(!verdict.allowed, "{preview:?} should be denied");
        assert!(SqlSafetyValidator::validate(&sql).is_err());
    }
}

#[test]
fn test_blank_is_denied_with_a_reason() {
    for sql in ["", "   ", "\n\t"] {
        let verdict = SqlSafetyValidator::classify(sql);
        assert!(!verdict.allowed);
        assert!(verdict.reason.unwrap().contains("empty"));
    }
}

#[test]
fn fuzz_cleanup_is_idempotent() {
    let mut rng = rand::thread_rng();
    for _ in 0..300 {
        let body = format!("SELECT {}\nFROM t{}", random_string(rng.gen_range(1..20)), rng.gen_range(0..9));
        let raw = match rng.gen_range(0..3) {
            0 => format!("```sql\n{};\n```", body),
            1 => format!("{}{};{}", random_whitespace(3), body, random_whitespace(3)),
            _ => body.clone(),
        };
        let once = SqlSafetyValidator::clean_generated_sql(&raw);
        let twice = SqlSafetyValidator::clean_generated_sql(&once);
        assert_eq!(once, twice);
        assert!(!once.contains('\n') && !once.ends_with(';'));
        assert!(SqlSafetyValidator::validate(&once).is_ok(), "{once:?}");
    }
}
