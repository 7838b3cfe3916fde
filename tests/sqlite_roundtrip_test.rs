//! End-to-end tests against SQLite: builders, entities and the schema cache.

mod common;

use common::{count_users, setup, User};
use sqlweave::builder::SelectOutput;
use sqlweave::models::{DbType, Operator};
use sqlweave::{DbError, Value};
use std::sync::Arc;

#[tokio::test]
async fn test_entity_round_trip() {
    let db = setup("").await;
    let alice = User::new(1, "alice", 30);
    let bob = User {
        email: None,
        ..User::new(2, "bob", 41)
    };
    assert_eq!(db.insert(&alice).await.unwrap(), 1);
    assert_eq!(db.insert(&bob).await.unwrap(), 1);

    let select = db.select_of::<User>().await.unwrap().order_by("id");
    let users: Vec<User> = db.query_builder_as(&select).await.unwrap();
    assert_eq!(users, vec![alice.clone(), bob.clone()]);

    let renamed = User {
        name: "alicia".into(),
        ..alice.clone()
    };
    assert_eq!(db.update(&renamed).await.unwrap(), 1);
    let rows: Vec<User> = db
        .query_as("SELECT * FROM users WHERE id = ?1", [Value::Int(1)])
        .await
        .unwrap();
    assert_eq!(rows, vec![renamed.clone()]);

    assert_eq!(db.delete(&bob).await.unwrap(), 1);
    assert_eq!(count_users(&db).await, 1);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_update_or_insert() {
    let db = setup("").await;
    let mut user = User::new(7, "gus", 20);

    assert_eq!(db.update_or_insert(&user).await.unwrap(), 1);
    assert_eq!(count_users(&db).await, 1);

    user.age = 21;
    assert_eq!(db.update_or_insert(&user).await.unwrap(), 1);
    assert_eq!(count_users(&db).await, 1);
    let age = db
        .scalar("SELECT age FROM users WHERE id = ?1", [Value::Int(7)])
        .await
        .unwrap();
    assert_eq!(age, Value::Int(21));
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_select_builders() {
    let db = setup("").await;
    for (id, name, age) in [(1, "a", 10), (2, "b", 20), (3, "c", 30), (4, "d", 40)] {
        db.insert(&User::new(id, name, age)).await.unwrap();
    }
    db.execute("UPDATE users SET email = NULL WHERE id = 4", []).await.unwrap();

    let rows = db
        .select("users")
        .await
        .unwrap()
        .where_op("age", Operator::Gte, 20)
        .where_in("id", [1, 2, 3])
        .order_by_desc("age")
        .execute()
        .await
        .unwrap()
        .into_rows();
    let ids: Vec<Value> = rows.iter().map(|r| r.get("id").cloned().unwrap()).collect();
    assert_eq!(ids, vec![Value::Int(3), Value::Int(2)]);

    let missing_email = db
        .select("users")
        .await
        .unwrap()
        .where_eq("email", Value::Null)
        .execute()
        .await
        .unwrap()
        .into_rows();
    assert_eq!(missing_email.len(), 1);

    // One column with LIMIT 1 is fetched as a scalar
    let output = db
        .select("users")
        .await
        .unwrap()
        .column("name")
        .where_eq("id", 2)
        .limit(1)
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(output, SelectOutput::Scalar(Value::Text("b".into())));

    let total = db
        .select("users")
        .await
        .unwrap()
        .count()
        .where_between("age", 15, 35)
        .execute()
        .await
        .unwrap()
        .into_scalar();
    assert_eq!(total, Value::Int(2));

    let paged = db
        .select("users")
        .await
        .unwrap()
        .column("id")
        .order_by("id")
        .limit(2)
        .unwrap()
        .offset(1)
        .unwrap()
        .execute()
        .await
        .unwrap()
        .into_rows();
    assert_eq!(paged.len(), 2);
    assert_eq!(paged[0].get("id"), Some(&Value::Int(2)));
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_table_builders_execute() {
    let db = setup("").await;
    let inserted = db
        .insert_into("users")
        .await
        .unwrap()
        .value("id", 1)
        .value("name", "x")
        .execute()
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let updated = db
        .update_table("users")
        .await
        .unwrap()
        .set("age", 5)
        .where_eq("id", 1)
        .execute()
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = db
        .delete_from("users")
        .await
        .unwrap()
        .where_eq("name", "x")
        .execute()
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db.remaining_builders(), 0);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_schema_cache() {
    let db = setup("").await;

    let first = db.schema("users").await.unwrap().unwrap();
    let second = db.schema("users").await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let id = first.get("ID").unwrap();
    assert_eq!(id.name, "id");
    assert!(id.is_key);
    assert_eq!(id.db_type, DbType::Int64);
    assert!(!first.get("name").unwrap().allow_null);

    assert_eq!(db.clear_schema(Some("users")).unwrap(), 1);
    let reprobed = db.schema("users").await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &reprobed));
    assert_eq!(*first, *reprobed);

    // Failed probes are not cached
    assert!(db.schema("missing").await.unwrap().is_none());
    assert_eq!(db.clear_schema(Some("missing")).unwrap(), 0);

    let mapped = db.schema_of::<User>().await.unwrap().unwrap();
    assert!(mapped.get("id").unwrap().is_key);
    let again = db.schema_of::<User>().await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&mapped, &again));
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_schema_disabled() {
    let db = setup("schema=false").await;
    assert!(db.schema("users").await.unwrap().is_none());
    // Mapped types fall back to their declarations
    let mapped = db.schema_of::<User>().await.unwrap().unwrap();
    assert_eq!(mapped.get("name").unwrap().db_type, DbType::String);
    db.insert(&User::new(1, "decl", 3)).await.unwrap();
    assert_eq!(count_users(&db).await, 1);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_execution_errors_carry_the_command() {
    let db = setup("").await;
    let err = db
        .execute("INSERT INTO nope (a) VALUES (?1)", [Value::Int(1)])
        .await
        .unwrap_err();
    match err {
        DbError::Query { command, .. } => {
            assert!(command.contains("INSERT INTO nope"));
            assert!(command.contains("?1"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    db.close().await.unwrap();
}
