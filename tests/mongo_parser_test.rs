//! Integration tests for the Mongo shell parser and BSON revival.

use mongodb::bson::Bson;
use query_gateway::mongo::{parse_mongo_query, revive_to_bson, QueryTarget};
use serde_json::json;

#[test]
fn test_projection_query_shape() {
    let parsed = parse_mongo_query("db.students.find({}, { name: 1, _id: 0 })").unwrap();
    assert_eq!(parsed.target, QueryTarget::Collection);
    assert_eq!(parsed.collection.as_deref(), Some("students"));
    assert_eq!(parsed.operation, "find");
    assert_eq!(parsed.args.len(), 2);
    assert_eq!(parsed.args[0], json!({}));
    assert_eq!(parsed.args[1], json!({"name": 1, "_id": 0}));
    assert!(parsed.chain.is_empty());
}

#[test]
fn test_one_arg_find_is_not_projected() {
    let parsed = parse_mongo_query("db.students.find({})").unwrap();
    assert_eq!(parsed.args.len(), 1);
}

#[test]
fn test_full_chain_statement() {
    let parsed = parse_mongo_query(
        "db.students.find({age:{$gt:10}}, {name:1}).sort({name:1}).limit(5);",
    )
    .unwrap();
    assert_eq!(parsed.operation, "find");
    assert_eq!(parsed.args[0], json!({"age": {"$gt": 10}}));
    assert_eq!(parsed.args[1], json!({"name": 1}));
    assert_eq!(parsed.chain.len(), 2);
    assert_eq!(parsed.chain[0].name, "sort");
    assert_eq!(parsed.chain[1].name, "limit");
    assert_eq!(parsed.chain[1].args[0], json!(5));
}

#[test]
fn test_parse_is_stable_under_reparse() {
    // Parsing the same text twice yields identical structures; this is the
    // fixed point the round-trip property relies on.
    let q = "db.s.find({a: {$in: [1, 2]}}, {a: 1}).sort({a: -1}).skip(1).limit(2)";
    assert_eq!(parse_mongo_query(q).unwrap(), parse_mongo_query(q).unwrap());
}

#[test]
fn test_shell_command_rewrites() {
    let dbs = parse_mongo_query("show dbs").unwrap();
    assert_eq!(dbs.target, QueryTarget::Admin);
    assert_eq!(dbs.operation, "listDatabases");

    let collections = parse_mongo_query("show collections").unwrap();
    assert_eq!(collections.target, QueryTarget::Db);
    assert_eq!(collections.operation, "listCollections");

    let use_db = parse_mongo_query("use analytics").unwrap();
    assert_eq!(use_db.operation, "use");
    assert_eq!(use_db.database.as_deref(), Some("analytics"));
}

#[test]
fn test_bson_constructor_revival() {
    let parsed = parse_mongo_query(
        "db.events.find({_id: ObjectId(\"507f1f77bcf86cd799439011\"), at: ISODate(\"2024-05-01T12:00:00Z\"), n: NumberLong(\"9007199254740993\"), tag: /^a/i})",
    )
    .unwrap();

    let Bson::Document(filter) = revive_to_bson(&parsed.args[0]) else {
        panic!("expected document");
    };
    assert!(matches!(filter.get("_id"), Some(Bson::ObjectId(_))));
    assert!(matches!(filter.get("at"), Some(Bson::DateTime(_))));
    assert_eq!(filter.get("n"), Some(&Bson::Int64(9007199254740993)));
    match filter.get("tag") {
        Some(Bson::RegularExpression(re)) => {
            assert_eq!(re.pattern, "^a");
            assert_eq!(re.options, "i");
        }
        other => panic!("expected regex, got {:?}", other),
    }
}

#[test]
fn test_error_guidance() {
    let err = parse_mongo_query("db.users.find({}).length").unwrap_err();
    assert!(err.to_string().contains("countDocuments"));

    assert!(parse_mongo_query("users.find({})").is_err());
    assert!(parse_mongo_query("db.users").is_err());
}
