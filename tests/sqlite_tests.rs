//! SQLite tests: schema, seeding, batched snapshot scan, count, and the users export end to end.

use bulkpipe::source::sqlite::{is_encrypted, open_db, open_db_in_memory};
use bulkpipe::users::{
    UserDecoder, UserRecord, UserResponse, generate_users, insert_users, seed_users, to_response,
    users_query,
};
use bulkpipe::{
    CancelReason, Context, DataSource, PipelineError, PipelineOpts, ScanQuery, SourceCursor,
    SqliteSource, export_users, run_bulk_pipeline,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Runs for minutes unless interrupted.
const SLOW_COUNT_SQL: &str = r#"
WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 2000000000)
SELECT COUNT(*) FROM n"#;

/// Users scan whose first step has to finish a long recursive CTE.
const SLOW_SELECT_SQL: &str = r#"
SELECT u.id, u.name, u.email, u.password_hash, u.role, u.is_active, u.created_at_ns,
       u.updated_at_ns
FROM users u,
     (WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 2000000000)
      SELECT MAX(x) AS m FROM n) slow
ORDER BY u.created_at_ns DESC, u.id ASC"#;

fn user(id: &str, created_at_ns: i64) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        name: format!("User {}", id),
        email: format!("{}@example.com", id),
        password_hash: "digest".to_string(),
        role: "user".to_string(),
        is_active: true,
        created_at_ns,
        updated_at_ns: created_at_ns,
    }
}

/// File-backed DB so the scan and count connections are independent.
fn seeded_db(n: usize) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.db");
    let mut conn = open_db(&path, None).unwrap();
    seed_users(&mut conn, n).unwrap();
    (dir, path)
}

// --- schema / seeding ---

#[test]
fn test_in_memory_schema_accepts_users() {
    let mut conn = open_db_in_memory().unwrap();
    let inserted = insert_users(&mut conn, &[user("a", 1), user("b", 2)]).unwrap();
    assert_eq!(inserted, 2);
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn test_email_is_unique() {
    let mut conn = open_db_in_memory().unwrap();
    let mut dup = user("b", 2);
    dup.email = "a@example.com".to_string();
    assert!(insert_users(&mut conn, &[user("a", 1), dup]).is_err());
}

#[test]
fn test_seed_inserts_requested_count_across_batches() {
    let (_dir, path) = seeded_db(1_234);
    let conn = open_db(&path, None).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1_234);
    let distinct_hashes: i64 = conn
        .query_row("SELECT COUNT(DISTINCT password_hash) FROM users", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(distinct_hashes, 1);
}

#[test]
fn test_generated_users_look_valid() {
    let users = generate_users(500);
    assert_eq!(users.len(), 500);
    for u in &users {
        assert_eq!(u.id.len(), 24);
        assert!(u.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(u.email.contains('@'));
        assert!(u.role == "admin" || u.role == "user");
        assert_eq!(u.created_at_ns, u.updated_at_ns);
        assert!(to_response(u.clone()).is_ok());
    }
    let admins = users.iter().filter(|u| u.role == "admin").count();
    assert!(admins < 150, "{} admins out of 500", admins);
}

#[test]
fn test_plain_db_is_not_encrypted() {
    let (_dir, path) = seeded_db(1);
    assert!(!is_encrypted(&path));
    assert!(!is_encrypted(&path.with_extension("missing")));
}

// --- transform ---

#[test]
fn test_response_drops_password_and_uses_camel_case() {
    let resp = to_response(user("abc", 42)).unwrap();
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["id"], "abc");
    assert_eq!(json["isActive"], true);
    assert_eq!(json["createdAtNs"], 42);
    assert!(json.get("passwordHash").is_none());
    assert!(json.get("password_hash").is_none());
}

#[test]
fn test_response_rejects_malformed_email() {
    let mut bad = user("abc", 1);
    bad.email = "not-an-email".to_string();
    let err = to_response(bad).unwrap_err();
    assert!(err.to_string().contains("malformed email"));
}

// --- cursor / count ---

#[test]
fn test_cursor_scans_newest_first_across_batches() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.db");
    let mut conn = open_db(&path, None).unwrap();
    let users: Vec<UserRecord> = (0..25).map(|i| user(&format!("u{:02}", i), i)).collect();
    insert_users(&mut conn, &users).unwrap();
    drop(conn);

    let source = SqliteSource::new(&path, UserDecoder).with_batch_size(4);
    let mut cursor = source.open(&users_query()).unwrap();
    let mut seen = Vec::new();
    while let Some(u) = cursor.advance().unwrap() {
        seen.push(u.created_at_ns);
    }
    cursor.close();
    let expected: Vec<i64> = (0..25).rev().collect();
    assert_eq!(seen, expected);
    assert_eq!(
        source.count(&users_query(), &Context::background()).unwrap(),
        25
    );
}

#[test]
fn test_ties_broken_by_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.db");
    let mut conn = open_db(&path, None).unwrap();
    insert_users(&mut conn, &[user("c", 5), user("a", 5), user("b", 5)]).unwrap();
    drop(conn);

    let source = SqliteSource::new(&path, UserDecoder).with_batch_size(1);
    let mut cursor = source.open(&users_query()).unwrap();
    let mut ids = Vec::new();
    while let Some(u) = cursor.advance().unwrap() {
        ids.push(u.id);
    }
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn test_offset_paging_matches_keyset_paging() {
    let (_dir, path) = seeded_db(203);
    let source = SqliteSource::new(&path, UserDecoder).with_batch_size(10);
    let offset_query = ScanQuery::new(
        "SELECT * FROM users ORDER BY created_at_ns DESC, id ASC",
        "SELECT COUNT(*) FROM users",
    );
    let scan = |query: &ScanQuery| {
        let mut cursor = source.open(query).unwrap();
        let mut ids = Vec::new();
        while let Some(u) = cursor.advance().unwrap() {
            ids.push(u.id);
        }
        ids
    };
    let by_key = scan(&users_query());
    assert_eq!(by_key.len(), 203);
    assert_eq!(scan(&offset_query), by_key);
}

#[test]
fn test_scan_sees_snapshot_while_count_sees_writes() {
    let (_dir, path) = seeded_db(30);
    let source = SqliteSource::new(&path, UserDecoder).with_batch_size(10);
    let mut cursor = source.open(&users_query()).unwrap();
    let first = cursor.advance().unwrap();
    assert!(first.is_some());

    let mut writer = open_db(&path, None).unwrap();
    insert_users(&mut writer, &[user("late", i64::MAX)]).unwrap();

    let mut scanned = 1;
    while cursor.advance().unwrap().is_some() {
        scanned += 1;
    }
    assert_eq!(scanned, 30);
    assert_eq!(
        source.count(&users_query(), &Context::background()).unwrap(),
        31
    );
}

// --- end to end ---

#[test]
fn test_export_users_end_to_end() {
    let (_dir, path) = seeded_db(2_500);
    let opts = PipelineOpts {
        num_workers: Some(8),
        ..PipelineOpts::default()
    };
    let outcome = export_users(&Context::background(), &path, None, &opts);
    assert!(outcome.is_complete(), "{:?}", outcome.error);
    assert_eq!(outcome.total, Some(2_500));
    let users: Vec<UserResponse> = outcome.into_outputs().unwrap();
    assert_eq!(users.len(), 2_500);
    assert!(
        users
            .windows(2)
            .all(|w| (w[0].created_at_ns, &w[1].id) >= (w[1].created_at_ns, &w[0].id))
    );
}

#[test]
fn test_pipeline_matches_direct_scan_with_small_batches() {
    let (_dir, path) = seeded_db(777);
    let source = SqliteSource::new(&path, UserDecoder).with_batch_size(7);
    let mut cursor = source.open(&users_query()).unwrap();
    let mut direct = Vec::new();
    while let Some(u) = cursor.advance().unwrap() {
        direct.push(to_response(u).unwrap());
    }
    cursor.close();

    let outcome = run_bulk_pipeline(
        &Context::background(),
        &source,
        &users_query(),
        to_response,
        &PipelineOpts::default(),
    );
    assert_eq!(outcome.into_outputs().unwrap(), direct);
}

#[test]
fn test_missing_database_is_open_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.db");
    let outcome = export_users(&Context::background(), &path, None, &PipelineOpts::default());
    assert!(outcome.partial);
    assert!(outcome.items.is_empty());
    assert!(matches!(outcome.error, Some(PipelineError::Open(_))));
    assert!(matches!(
        outcome.count_error,
        Some(PipelineError::SourceCount(_))
    ));
    assert!(!path.exists());
}

#[test]
fn test_bad_row_is_tagged_in_place() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.db");
    let mut conn = open_db(&path, None).unwrap();
    let mut users: Vec<UserRecord> = (0..200).map(|i| user(&format!("u{:03}", i), i)).collect();
    users[57].email = "broken".to_string();
    insert_users(&mut conn, &users).unwrap();
    drop(conn);

    let outcome = export_users(&Context::background(), &path, None, &PipelineOpts::default());
    assert_eq!(outcome.items.len(), 200);
    assert_eq!(outcome.total, Some(200));
    // Newest first: created_at 57 sits at position 200 - 1 - 57.
    let failures: Vec<_> = outcome.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].ordinal, 142);
    assert!(!outcome.partial);
}

#[test]
fn test_cancelled_export_is_partial() {
    let (_dir, path) = seeded_db(3_000);
    let ctx = Context::background();
    ctx.cancel();
    let outcome = export_users(&ctx, &path, None, &PipelineOpts::default());
    assert!(outcome.partial);
    assert!(matches!(outcome.error, Some(PipelineError::Cancelled(_))));
}

#[test]
fn test_cancel_mid_scan_returns_scan_order_prefix() {
    let (_dir, path) = seeded_db(3_000);
    let source = SqliteSource::new(&path, UserDecoder).with_batch_size(5);
    let mut cursor = source.open(&users_query()).unwrap();
    let mut direct = Vec::new();
    while let Some(u) = cursor.advance().unwrap() {
        direct.push(u.id);
    }
    cursor.close();

    let ctx = Context::background();
    let canceller = ctx.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceller.cancel();
    });
    let opts = PipelineOpts {
        num_workers: Some(2),
        ..PipelineOpts::default()
    };
    let slow = |u: UserRecord| {
        thread::sleep(Duration::from_millis(2));
        to_response(u)
    };
    let started = Instant::now();
    let outcome = run_bulk_pipeline(&ctx, &source, &users_query(), slow, &opts);
    let elapsed = started.elapsed();
    handle.join().unwrap();

    assert!(outcome.partial);
    assert_eq!(
        outcome.error,
        Some(PipelineError::Cancelled(CancelReason::Cancelled))
    );
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    let ids: Vec<String> = outcome.successes().map(|u| u.id.clone()).collect();
    assert_eq!(ids.len(), outcome.items.len());
    assert!(ids.len() < 3_000);
    assert_eq!(ids[..], direct[..ids.len()]);
}

#[test]
fn test_deadline_interrupts_blocked_scan_step() {
    let (_dir, path) = seeded_db(50);
    let source = SqliteSource::new(&path, UserDecoder);
    let query = ScanQuery::new(SLOW_SELECT_SQL, "SELECT COUNT(*) FROM users");
    let ctx = Context::with_timeout(Duration::from_millis(150));
    let started = Instant::now();
    let outcome = run_bulk_pipeline(&ctx, &source, &query, to_response, &PipelineOpts::default());
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
    assert!(outcome.partial);
    assert!(outcome.items.is_empty());
    assert_eq!(
        outcome.error,
        Some(PipelineError::Cancelled(CancelReason::DeadlineExceeded))
    );
}

#[test]
fn test_deadline_interrupts_slow_count() {
    let (_dir, path) = seeded_db(50);
    let source = SqliteSource::new(&path, UserDecoder);
    let mut query = users_query();
    query.count_sql = SLOW_COUNT_SQL.to_string();
    let ctx = Context::with_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let outcome = run_bulk_pipeline(&ctx, &source, &query, to_response, &PipelineOpts::default());
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
    // The scan finished before the deadline; only the total is missing.
    assert!(!outcome.partial);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.items.len(), 50);
    assert_eq!(outcome.total, None);
    assert_eq!(
        outcome.count_error,
        Some(PipelineError::Cancelled(CancelReason::DeadlineExceeded))
    );
    assert_eq!(ctx.pending_hooks(), 0);
}
