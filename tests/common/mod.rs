//! Shared setup for the integration tests: a temporary SQLite database and
//! a mapped `User` type.

#![allow(dead_code)]

use sqlweave::models::{ColumnMapping, DbType, FromValue, TypeMapping};
use sqlweave::{Database, Entity, Value};
use std::sync::OnceLock;
use tempfile::TempDir;

pub const CREATE_USERS: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    age INTEGER
)";

/// A database on a temp file. The directory lives as long as the value.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

impl std::ops::Deref for TestDb {
    type Target = Database;

    fn deref(&self) -> &Database {
        &self.db
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open a fresh database with the `users` table. `options` is appended to
/// the URL query string, e.g. `single_connection=true`.
pub async fn setup(options: &str) -> TestDb {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let url = if options.is_empty() {
        format!("sqlite:{}", path.display())
    } else {
        format!("sqlite:{}?{}", path.display(), options)
    };
    let db = Database::connect(&url).await.unwrap();
    db.execute(CREATE_USERS, []).await.unwrap();
    TestDb { db, _dir: dir }
}

pub async fn count_users(db: &Database) -> i64 {
    match db.scalar("SELECT COUNT(*) FROM users", []).await.unwrap() {
        Value::Int(n) => n,
        other => panic!("unexpected count {other:?}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub age: i64,
}

impl User {
    pub fn new(id: i64, name: &str, age: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            email: Some(format!("{name}@example.com")),
            age,
        }
    }
}

impl Entity for User {
    fn mapping() -> &'static TypeMapping<Self> {
        static MAPPING: OnceLock<TypeMapping<User>> = OnceLock::new();
        MAPPING.get_or_init(|| {
            TypeMapping::new("tests::User", "users")
                .column(
                    ColumnMapping::new(
                        "id",
                        DbType::Int64,
                        |u: &User| u.id.into(),
                        |u: &mut User, v| {
                            u.id = FromValue::from_value(v)?;
                            Ok(())
                        },
                    )
                    .key(),
                )
                .column(ColumnMapping::new(
                    "name",
                    DbType::String,
                    |u: &User| u.name.clone().into(),
                    |u: &mut User, v| {
                        u.name = FromValue::from_value(v)?;
                        Ok(())
                    },
                ))
                .column(ColumnMapping::new(
                    "email",
                    DbType::String,
                    |u: &User| u.email.clone().into(),
                    |u: &mut User, v| {
                        u.email = FromValue::from_value(v)?;
                        Ok(())
                    },
                ))
                .column(ColumnMapping::new(
                    "age",
                    DbType::Int64,
                    |u: &User| u.age.into(),
                    |u: &mut User, v| {
                        u.age = FromValue::from_value(v)?;
                        Ok(())
                    },
                ))
        })
    }
}
