//! User records: stored row, public response shape, the row decoder, and a seeder.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use rand::Rng;
use rand::seq::IndexedRandom;
use rusqlite::{Connection, Row};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::source::{RowDecoder, ScanQuery, SortOrder};
use crate::utils::config::{DB_INSERT_BATCH_SIZE, SEED_PASSWORD};

const SELECT_USERS_SQL: &str = r#"
SELECT id, name, email, password_hash, role, is_active, created_at_ns, updated_at_ns
FROM users"#;

const COUNT_USERS_SQL: &str = "SELECT COUNT(*) FROM users";

const INSERT_USER_SQL: &str = r#"
INSERT INTO users (id, name, email, password_hash, role, is_active, created_at_ns, updated_at_ns)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#;

/// One row of the `users` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    /// 24 hex chars.
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub created_at_ns: i64,
    pub updated_at_ns: i64,
}

/// What leaves the system: the record without its password hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at_ns: i64,
    pub updated_at_ns: i64,
}

/// Pure transform used by the export. Rejects rows that cannot be shown to a client.
pub fn to_response(user: UserRecord) -> Result<UserResponse> {
    if user.id.is_empty() {
        bail!("user row has no id");
    }
    if !user.email.contains('@') {
        bail!("user {} has a malformed email {:?}", user.id, user.email);
    }
    Ok(UserResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        is_active: user.is_active,
        created_at_ns: user.created_at_ns,
        updated_at_ns: user.updated_at_ns,
    })
}

/// Newest first, ties broken by id. Pages by `(created_at_ns, id)`, which `idx_users_created`
/// covers.
pub fn users_query() -> ScanQuery {
    ScanQuery::new(SELECT_USERS_SQL, COUNT_USERS_SQL)
        .order_by(&[("created_at_ns", SortOrder::Desc), ("id", SortOrder::Asc)])
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UserDecoder;

impl RowDecoder for UserDecoder {
    type Item = UserRecord;

    fn decode(&self, row: &Row<'_>) -> rusqlite::Result<UserRecord> {
        Ok(UserRecord {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            role: row.get("role")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            created_at_ns: row.get("created_at_ns")?,
            updated_at_ns: row.get("updated_at_ns")?,
        })
    }
}

/// Insert `users` in transactions of [`DB_INSERT_BATCH_SIZE`]. Returns rows inserted.
pub fn insert_users(conn: &mut Connection, users: &[UserRecord]) -> Result<usize> {
    let mut inserted = 0_usize;
    for chunk in users.chunks(DB_INSERT_BATCH_SIZE) {
        let tx = conn.transaction().context("begin transaction")?;
        {
            let mut stmt = tx.prepare_cached(INSERT_USER_SQL).context("prepare insert")?;
            for u in chunk {
                stmt.execute(rusqlite::params![
                    u.id,
                    u.name,
                    u.email,
                    u.password_hash,
                    u.role,
                    u.is_active as i64,
                    u.created_at_ns,
                    u.updated_at_ns,
                ])
                .with_context(|| format!("insert user {}", u.email))?;
            }
        }
        tx.commit().context("commit transaction")?;
        inserted += chunk.len();
        debug!("seed: inserted {} users", inserted);
    }
    Ok(inserted)
}

const FIRST_NAMES: &[&str] = &[
    "John", "Jane", "Michael", "Sarah", "David", "Emily", "James", "Jessica", "Robert", "Ashley",
    "William", "Amanda", "Richard", "Melissa", "Joseph", "Deborah", "Thomas", "Michelle",
    "Charles", "Carol", "Daniel", "Nancy", "Matthew", "Karen", "Anthony", "Betty", "Mark",
    "Helen", "Steven", "Donna", "Paul", "Laura", "Kevin", "Angela", "Brian", "Emma",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Wilson", "Anderson", "Thomas", "Taylor", "Moore",
    "Jackson", "Martin", "Lee", "Thompson", "White", "Harris", "Sanchez", "Clark", "Ramirez",
    "Lewis", "Robinson", "Walker", "Young", "Allen", "King", "Wright", "Scott", "Nguyen", "Hill",
];

const EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "aol.com",
    "icloud.com",
    "protonmail.com",
    "mail.com",
    "zoho.com",
    "yandex.com",
];

const DAY_NS: i64 = 24 * 60 * 60 * 1_000_000_000;

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}

fn random_id<R: Rng>(rng: &mut R) -> String {
    let bytes: [u8; 12] = rng.random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate `count` users: random names, ~10% admins, ~5% inactive, created within the last
/// year. Every user shares one password digest.
pub fn generate_users(count: usize) -> Vec<UserRecord> {
    let mut rng = rand::rng();
    let password_hash = blake3::hash(SEED_PASSWORD.as_bytes()).to_hex().to_string();
    let now = now_ns();
    (0..count)
        .map(|_| {
            let first = FIRST_NAMES.choose(&mut rng).copied().unwrap_or("User");
            let last = LAST_NAMES.choose(&mut rng).copied().unwrap_or("Seed");
            let domain = EMAIL_DOMAINS.choose(&mut rng).copied().unwrap_or("example.com");
            let id = random_id(&mut rng);
            let email = format!(
                "{}.{}.{}@{}",
                first.to_lowercase(),
                last.to_lowercase(),
                &id[..8],
                domain
            );
            let role = if rng.random::<f32>() < 0.1 {
                "admin"
            } else {
                "user"
            };
            let is_active = rng.random::<f32>() >= 0.05;
            let days_ago = rng.random_range(0..365_i64);
            let created_at_ns = now - days_ago * DAY_NS - rng.random_range(0..DAY_NS);
            UserRecord {
                id,
                name: format!("{} {}", first, last),
                email,
                password_hash: password_hash.clone(),
                role: role.to_string(),
                is_active,
                created_at_ns,
                updated_at_ns: created_at_ns,
            }
        })
        .collect()
}

/// Generate and insert `count` users.
pub fn seed_users(conn: &mut Connection, count: usize) -> Result<usize> {
    info!("Generating {} users...", count);
    let users = generate_users(count);
    let inserted = insert_users(conn, &users)?;
    info!("Seeded {} users", inserted);
    Ok(inserted)
}
