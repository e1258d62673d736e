//! Integration tests for the MongoDB adapter.
//!
//! These tests require a running MongoDB server. Set TEST_MONGODB_URL to run
//! them, e.g. TEST_MONGODB_URL="mongodb://localhost:27017/gateway_test".

use query_gateway::config::AdapterSettings;
use query_gateway::db::MongoAdapter;
use query_gateway::models::QueryOptions;
use serde_json::json;

const TEST_DB: &str = "gateway_adapter_test";

fn mongodb_url() -> Option<String> {
    match std::env::var("TEST_MONGODB_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test: TEST_MONGODB_URL not set");
            None
        }
    }
}

async fn connected_adapter(url: &str) -> MongoAdapter {
    let adapter = MongoAdapter::new(AdapterSettings::default(), false);
    adapter.connect(url).await.unwrap();
    adapter
}

#[tokio::test]
async fn test_insert_find_with_projection() {
    let Some(url) = mongodb_url() else { return };
    let adapter = connected_adapter(&url).await;

    adapter
        .execute_query("db.students.drop()", Some(TEST_DB), &QueryOptions::default())
        .await
        .ok();
    adapter
        .execute_query(
            "db.students.insertMany([{name: \"A\", age: 10}, {name: \"B\", age: 11}])",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    let result = adapter
        .execute_query(
            "db.students.find({}, { name: 1, _id: 0 }).sort({name: 1})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0], json!({"name": "A"}).as_object().unwrap().clone());
    assert_eq!(result.rows[1], json!({"name": "B"}).as_object().unwrap().clone());
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "name");
    assert_eq!(result.columns[0].type_name, "string");

    adapter
        .execute_query("db.students.drop()", Some(TEST_DB), &QueryOptions::default())
        .await
        .unwrap();
    adapter.disconnect().await;
}

#[tokio::test]
async fn test_count_update_delete_round() {
    let Some(url) = mongodb_url() else { return };
    let adapter = connected_adapter(&url).await;

    adapter
        .execute_query("db.ops.drop()", Some(TEST_DB), &QueryOptions::default())
        .await
        .ok();
    adapter
        .execute_query(
            "db.ops.insertOne({k: 1, v: \"x\"})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    let count = adapter
        .execute_query(
            "db.ops.countDocuments({k: 1})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(count.rows[0].get("count"), Some(&json!(1)));

    let updated = adapter
        .execute_query(
            "db.ops.updateOne({k: 1}, {$set: {v: \"y\"}})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated.rows[0].get("modifiedCount"), Some(&json!(1)));

    let deleted = adapter
        .execute_query(
            "db.ops.deleteMany({})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(deleted.rows[0].get("deletedCount"), Some(&json!(1)));

    adapter.disconnect().await;
}

#[tokio::test]
async fn test_aggregate_pipeline() {
    let Some(url) = mongodb_url() else { return };
    let adapter = connected_adapter(&url).await;

    adapter
        .execute_query("db.sales.drop()", Some(TEST_DB), &QueryOptions::default())
        .await
        .ok();
    adapter
        .execute_query(
            "db.sales.insertMany([{region: \"n\", amount: 5}, {region: \"n\", amount: 7}, {region: \"s\", amount: 1}])",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    let result = adapter
        .execute_query(
            "db.sales.aggregate([{$group: {_id: \"$region\", total: {$sum: \"$amount\"}}}]).sort({_id: 1})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.rows[0].get("total"), Some(&json!(12)));

    adapter
        .execute_query("db.sales.drop()", Some(TEST_DB), &QueryOptions::default())
        .await
        .unwrap();
    adapter.disconnect().await;
}

#[tokio::test]
async fn test_collection_names_shape() {
    let Some(url) = mongodb_url() else { return };
    let adapter = connected_adapter(&url).await;

    adapter
        .execute_query(
            "db.createCollection(\"named_probe\")",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .ok();

    let result = adapter
        .execute_query(
            "db.getCollectionNames()",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    // Rows are objects carrying a `name` field; accept shells that return
    // extra fields by extracting just the name.
    let names: Vec<&str> = result
        .rows
        .iter()
        .filter_map(|row| row.get("name").and_then(|v| v.as_str()))
        .collect();
    assert!(names.contains(&"named_probe"));

    adapter
        .execute_query(
            "db.named_probe.drop()",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    adapter.disconnect().await;
}

#[tokio::test]
async fn test_deprecated_operation_message() {
    let Some(url) = mongodb_url() else { return };
    let adapter = connected_adapter(&url).await;

    let err = adapter
        .execute_query(
            "db.users.insert({a: 1})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("insertOne"));

    adapter.disconnect().await;
}

#[tokio::test]
async fn test_default_connection_simulates_drop_database() {
    let Some(url) = mongodb_url() else { return };
    let adapter = MongoAdapter::new(AdapterSettings::default(), true);
    adapter.connect(&url).await.unwrap();

    adapter
        .execute_query(
            "db.keepme.insertOne({v: 1})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    let simulated = adapter
        .execute_query("db.dropDatabase()", Some(TEST_DB), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(
        simulated.rows[0].get("simulated"),
        Some(&json!(true))
    );

    // The data survived the simulated drop.
    let count = adapter
        .execute_query(
            "db.keepme.countDocuments({})",
            Some(TEST_DB),
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(count.rows[0].get("count"), Some(&json!(1)));

    adapter
        .execute_query(
            "db.keepme.drop()",
            Some(TEST_DB),
            &QueryOptions {
                allow_destructive: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    adapter.disconnect().await;
}
