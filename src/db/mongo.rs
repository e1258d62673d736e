//! MongoDB adapter.
//!
//! Dispatches parsed shell statements to driver operations. Cursor-producing
//! operations apply their chained methods in order and are capped by the
//! configured default limit; every operation carries `maxTimeMS`. Result
//! columns are inferred from the union of top-level document keys, typed by
//! the first document where each key is defined.

use std::time::Instant;

use futures_util::StreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, ClientSession, IndexModel};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::AdapterSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::mongo::args::{bson_kind_name, optional_document, value_to_document};
use crate::mongo::parser::{parse_mongo_query, ChainCall, ParsedMongoQuery, QueryTarget};
use crate::models::{ColumnInfo, ColumnMeta, QueryOptions, QueryResult, TableInfo, TableType};

/// Databases never listed or dropped by tenant cleanup.
const SYSTEM_DATABASES: &[&str] = &["admin", "local", "config"];

/// Option keys that disqualify a second `find` argument from being treated
/// as a projection.
const RESERVED_FIND_OPTIONS: &[&str] = &["sort", "limit", "skip", "projection", "maxTimeMS"];

/// Deprecated shell operations and their modern equivalents.
const DEPRECATED_OPERATIONS: &[(&str, &str)] = &[
    ("findAndModify", "findOneAndUpdate / findOneAndDelete"),
    ("group", "aggregate with a $group stage"),
    ("mapReduce", "aggregate"),
    ("insert", "insertOne or insertMany"),
    ("update", "updateOne or updateMany"),
    ("remove", "deleteOne or deleteMany"),
    ("save", "insertOne or replaceOne"),
    ("ensureIndex", "createIndex"),
    ("copyTo", "aggregate with a $out stage"),
];

pub struct MongoAdapter {
    client: RwLock<Option<Client>>,
    session: Mutex<Option<ClientSession>>,
    default_database: RwLock<Option<String>>,
    settings: AdapterSettings,
    is_default_connection: bool,
}

impl MongoAdapter {
    pub fn new(settings: AdapterSettings, is_default_connection: bool) -> Self {
        Self {
            client: RwLock::new(None),
            session: Mutex::new(None),
            default_database: RwLock::new(None),
            settings,
            is_default_connection,
        }
    }

    pub async fn connect(&self, connection_url: &str) -> GatewayResult<()> {
        let options = ClientOptions::parse(connection_url)
            .await
            .map_err(|e| GatewayError::execution(format!("Invalid MongoDB URL: {}", e)))?;
        let default_db = options.default_database.clone();
        let client = Client::with_options(options)
            .map_err(|e| GatewayError::execution(format!("MongoDB connect failed: {}", e)))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        *self.default_database.write().await = default_db;
        *self.client.write().await = Some(client);
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(mut session) = self.session.lock().await.take() {
            if let Err(e) = session.abort_transaction().await {
                warn!(error = %e, "Abort transaction during disconnect failed");
            }
        }
        self.client.write().await.take();
    }

    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn client(&self) -> GatewayResult<Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| GatewayError::execution("Not connected to MongoDB"))
    }

    pub async fn server_version(&self) -> GatewayResult<String> {
        let client = self.client().await?;
        let info = client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await?;
        Ok(info.get_str("version").unwrap_or("unknown").to_string())
    }

    /// Health ping. Failures are logged; the driver reconnects on its own.
    pub async fn ping(&self) -> bool {
        let Ok(client) = self.client().await else {
            return false;
        };
        match client.database("admin").run_command(doc! { "ping": 1 }).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "MongoDB health check failed");
                false
            }
        }
    }

    /// Execute one shell statement.
    pub async fn execute_query(
        &self,
        query: &str,
        database: Option<&str>,
        options: &QueryOptions,
    ) -> GatewayResult<QueryResult> {
        let start = Instant::now();
        let parsed = parse_mongo_query(query)?;

        let effective_db = match &parsed.database {
            Some(db) => db.clone(),
            None => match database {
                Some(db) => db.to_string(),
                None => self
                    .default_database
                    .read()
                    .await
                    .clone()
                    .unwrap_or_else(|| "test".to_string()),
            },
        };

        debug!(
            target = ?parsed.target,
            operation = %parsed.operation,
            database = %effective_db,
            "Dispatching Mongo operation"
        );

        let budget = self.settings.query_timeout;
        let run = self.dispatch(&parsed, &effective_db, options, start);
        match timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::cancelled(
                "query execution",
                start.elapsed().as_millis() as u64,
            )),
        }
    }

    async fn dispatch(
        &self,
        parsed: &ParsedMongoQuery,
        database: &str,
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        match parsed.target {
            QueryTarget::Admin => self.dispatch_admin(parsed, start).await,
            QueryTarget::Db => self.dispatch_db(parsed, database, options, start).await,
            QueryTarget::Collection => {
                self.dispatch_collection(parsed, database, options, start).await
            }
        }
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    async fn dispatch_admin(
        &self,
        parsed: &ParsedMongoQuery,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let client = self.client().await?;
        match parsed.operation.as_str() {
            "listDatabases" => {
                let reply = client
                    .database("admin")
                    .run_command(doc! { "listDatabases": 1 })
                    .await?;
                let rows = reply
                    .get_array("databases")
                    .map(|dbs| {
                        dbs.iter()
                            .filter_map(|b| b.as_document())
                            .map(document_to_row)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(rows_result(rows, start))
            }
            "stats" | "serverStatus" => {
                let reply = client
                    .database("admin")
                    .run_command(doc! { "serverStatus": 1 })
                    .await?;
                Ok(rows_result(vec![document_to_row(&reply)], start))
            }
            other => Err(GatewayError::validation(format!(
                "Unsupported admin operation '{}'",
                other
            ))),
        }
    }

    // =========================================================================
    // Database-level operations
    // =========================================================================

    async fn dispatch_db(
        &self,
        parsed: &ParsedMongoQuery,
        database: &str,
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let client = self.client().await?;
        let db = client.database(database);

        match parsed.operation.as_str() {
            "use" => {
                *self.default_database.write().await = Some(database.to_string());
                let mut row = serde_json::Map::new();
                row.insert("ok".into(), JsonValue::from(1));
                row.insert("switched".into(), JsonValue::String(database.to_string()));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "stats" => {
                let reply = db.run_command(doc! { "dbStats": 1 }).await?;
                Ok(rows_result(vec![document_to_row(&reply)], start))
            }
            "listDatabases" => {
                self.dispatch_admin(
                    &ParsedMongoQuery {
                        operation: "listDatabases".into(),
                        ..parsed.clone()
                    },
                    start,
                )
                .await
            }
            "listCollections" | "getCollectionNames" => {
                let names = db.list_collection_names().await?;
                let rows = names
                    .into_iter()
                    .map(|name| {
                        let mut row = serde_json::Map::new();
                        row.insert("name".into(), JsonValue::String(name));
                        row
                    })
                    .collect();
                Ok(QueryResult::from_rows(
                    rows,
                    vec![ColumnMeta::new("name", "string")],
                    elapsed(start),
                ))
            }
            "createCollection" => {
                let name = string_arg(&parsed.args, 0, "createCollection")?;
                db.create_collection(&name).await?;
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert("created".into(), JsonValue::String(name));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "dropDatabase" => {
                if let Some(simulated) = self.simulate(options, "dropDatabase", start) {
                    return Ok(simulated);
                }
                db.drop().await?;
                info!(database = %database, "Dropped MongoDB database");
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert("dropped".into(), JsonValue::String(database.to_string()));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "dropCollection" => {
                if let Some(simulated) = self.simulate(options, "dropCollection", start) {
                    return Ok(simulated);
                }
                let name = string_arg(&parsed.args, 0, "dropCollection")?;
                db.collection::<Document>(&name).drop().await?;
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert("dropped".into(), JsonValue::String(name));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            other => Err(GatewayError::validation(format!(
                "Unsupported database operation '{}'",
                other
            ))),
        }
    }

    // =========================================================================
    // Collection-level operations
    // =========================================================================

    async fn dispatch_collection(
        &self,
        parsed: &ParsedMongoQuery,
        database: &str,
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let operation = parsed.operation.as_str();
        if let Some((_, replacement)) = DEPRECATED_OPERATIONS
            .iter()
            .find(|(name, _)| *name == operation)
        {
            return Err(GatewayError::validation(format!(
                "'{}' is a deprecated shell operation; use {} instead",
                operation, replacement
            )));
        }

        let client = self.client().await?;
        let collection_name = parsed
            .collection
            .as_deref()
            .ok_or_else(|| GatewayError::internal("Collection target without a collection"))?;
        let coll = client
            .database(database)
            .collection::<Document>(collection_name);

        match operation {
            "find" => self.run_find(&coll, parsed, options, start).await,
            "findOne" => {
                let filter = optional_document(&parsed.args, 0)?;
                let projection = self.find_projection(&parsed.args)?;
                let mut action = coll.find_one(filter);
                if let Some(projection) = projection {
                    action = action.projection(projection);
                }
                let mut session_guard = self.session.lock().await;
                let found = match session_guard.as_mut() {
                    Some(session) => action.session(session).await?,
                    None => action.await?,
                };
                let rows: Vec<_> = found.iter().map(document_to_row).collect();
                Ok(rows_result(rows, start))
            }
            "aggregate" => self.run_aggregate(&coll, parsed, options, start).await,
            "countDocuments" | "count" => {
                let filter = optional_document(&parsed.args, 0)?;
                let count = coll.count_documents(filter).await?;
                let mut row = serde_json::Map::new();
                row.insert("count".into(), JsonValue::Number(count.into()));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "estimatedDocumentCount" => {
                let count = coll.estimated_document_count().await?;
                let mut row = serde_json::Map::new();
                row.insert("count".into(), JsonValue::Number(count.into()));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "distinct" => {
                let field = string_arg(&parsed.args, 0, "distinct")?;
                let filter = optional_document(&parsed.args, 1)?;
                let values = coll.distinct(&field, filter).await?;
                let rows = values
                    .iter()
                    .map(|value| {
                        let mut row = serde_json::Map::new();
                        row.insert("value".into(), bson_to_json(value));
                        row
                    })
                    .collect();
                Ok(QueryResult::from_rows(
                    rows,
                    vec![ColumnMeta::new("value", "string")],
                    elapsed(start),
                ))
            }
            "insertOne" => {
                let document = value_to_document(
                    parsed
                        .args
                        .first()
                        .ok_or_else(|| GatewayError::validation("insertOne expects a document"))?,
                )?;
                let mut session_guard = self.session.lock().await;
                let outcome = match session_guard.as_mut() {
                    Some(session) => coll.insert_one(&document).session(session).await?,
                    None => coll.insert_one(&document).await?,
                };
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert("insertedId".into(), bson_to_json(&outcome.inserted_id));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "insertMany" => {
                let JsonValue::Array(items) = parsed
                    .args
                    .first()
                    .ok_or_else(|| GatewayError::validation("insertMany expects an array"))?
                else {
                    return Err(GatewayError::validation(
                        "insertMany expects an array of documents",
                    ));
                };
                let documents = items
                    .iter()
                    .map(value_to_document)
                    .collect::<GatewayResult<Vec<_>>>()?;
                let mut session_guard = self.session.lock().await;
                let outcome = match session_guard.as_mut() {
                    Some(session) => coll.insert_many(&documents).session(session).await?,
                    None => coll.insert_many(&documents).await?,
                };
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert(
                    "insertedCount".into(),
                    JsonValue::Number(outcome.inserted_ids.len().into()),
                );
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "updateOne" | "updateMany" => {
                let filter = optional_document(&parsed.args, 0)?;
                let update = update_argument(&parsed.args, 1)?;
                let many = operation == "updateMany";
                let mut session_guard = self.session.lock().await;
                let outcome = match (many, session_guard.as_mut()) {
                    (false, Some(session)) => {
                        coll.update_one(filter, update).session(session).await?
                    }
                    (false, None) => coll.update_one(filter, update).await?,
                    (true, Some(session)) => {
                        coll.update_many(filter, update).session(session).await?
                    }
                    (true, None) => coll.update_many(filter, update).await?,
                };
                Ok(QueryResult::command(update_row(&outcome), elapsed(start)))
            }
            "replaceOne" => {
                let filter = optional_document(&parsed.args, 0)?;
                let replacement = value_to_document(parsed.args.get(1).ok_or_else(|| {
                    GatewayError::validation("replaceOne expects a replacement document")
                })?)?;
                let mut session_guard = self.session.lock().await;
                let outcome = match session_guard.as_mut() {
                    Some(session) => coll.replace_one(filter, &replacement).session(session).await?,
                    None => coll.replace_one(filter, &replacement).await?,
                };
                Ok(QueryResult::command(update_row(&outcome), elapsed(start)))
            }
            "deleteOne" | "deleteMany" => {
                let filter = optional_document(&parsed.args, 0)?;
                let many = operation == "deleteMany";
                let mut session_guard = self.session.lock().await;
                let outcome = match (many, session_guard.as_mut()) {
                    (false, Some(session)) => coll.delete_one(filter).session(session).await?,
                    (false, None) => coll.delete_one(filter).await?,
                    (true, Some(session)) => coll.delete_many(filter).session(session).await?,
                    (true, None) => coll.delete_many(filter).await?,
                };
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert(
                    "deletedCount".into(),
                    JsonValue::Number(outcome.deleted_count.into()),
                );
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "findOneAndUpdate" => {
                let filter = optional_document(&parsed.args, 0)?;
                let update = update_argument(&parsed.args, 1)?;
                let mut session_guard = self.session.lock().await;
                let found = match session_guard.as_mut() {
                    Some(session) => {
                        coll.find_one_and_update(filter, update).session(session).await?
                    }
                    None => coll.find_one_and_update(filter, update).await?,
                };
                let rows: Vec<_> = found.iter().map(document_to_row).collect();
                Ok(rows_result(rows, start))
            }
            "findOneAndDelete" => {
                let filter = optional_document(&parsed.args, 0)?;
                let mut session_guard = self.session.lock().await;
                let found = match session_guard.as_mut() {
                    Some(session) => coll.find_one_and_delete(filter).session(session).await?,
                    None => coll.find_one_and_delete(filter).await?,
                };
                let rows: Vec<_> = found.iter().map(document_to_row).collect();
                Ok(rows_result(rows, start))
            }
            "findOneAndReplace" => {
                let filter = optional_document(&parsed.args, 0)?;
                let replacement = value_to_document(parsed.args.get(1).ok_or_else(|| {
                    GatewayError::validation("findOneAndReplace expects a replacement document")
                })?)?;
                let mut session_guard = self.session.lock().await;
                let found = match session_guard.as_mut() {
                    Some(session) => {
                        coll.find_one_and_replace(filter, replacement).session(session).await?
                    }
                    None => coll.find_one_and_replace(filter, replacement).await?,
                };
                let rows: Vec<_> = found.iter().map(document_to_row).collect();
                Ok(rows_result(rows, start))
            }
            "createIndex" => {
                let keys = value_to_document(parsed.args.first().ok_or_else(|| {
                    GatewayError::validation("createIndex expects a key specification")
                })?)?;
                let mut index_options = IndexOptions::default();
                if let Some(raw) = parsed.args.get(1) {
                    let opts = value_to_document(raw)?;
                    if let Ok(name) = opts.get_str("name") {
                        index_options.name = Some(name.to_string());
                    }
                    if let Ok(unique) = opts.get_bool("unique") {
                        index_options.unique = Some(unique);
                    }
                }
                let model = IndexModel::builder()
                    .keys(keys)
                    .options(index_options)
                    .build();
                let outcome = coll.create_index(model).await?;
                let mut row = serde_json::Map::new();
                row.insert(
                    "createdIndexName".into(),
                    JsonValue::String(outcome.index_name),
                );
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "listIndexes" | "getIndexes" => {
                let mut cursor = coll.list_indexes().await?;
                let mut rows = Vec::new();
                while let Some(index) = cursor.next().await {
                    let index = index?;
                    let mut row = serde_json::Map::new();
                    row.insert(
                        "name".into(),
                        index
                            .options
                            .as_ref()
                            .and_then(|o| o.name.clone())
                            .map(JsonValue::String)
                            .unwrap_or(JsonValue::Null),
                    );
                    row.insert("key".into(), bson_to_json(&Bson::Document(index.keys)));
                    rows.push(row);
                }
                Ok(rows_result(rows, start))
            }
            "dropIndex" => {
                let name = string_arg(&parsed.args, 0, "dropIndex")?;
                coll.drop_index(&name).await?;
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert("dropped".into(), JsonValue::String(name));
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "drop" => {
                if let Some(simulated) = self.simulate(options, "drop", start) {
                    return Ok(simulated);
                }
                coll.drop().await?;
                let mut row = serde_json::Map::new();
                row.insert("acknowledged".into(), JsonValue::Bool(true));
                row.insert(
                    "dropped".into(),
                    JsonValue::String(collection_name.to_string()),
                );
                Ok(QueryResult::command(row, elapsed(start)))
            }
            "stats" => {
                let reply = client
                    .database(database)
                    .run_command(doc! { "collStats": collection_name })
                    .await?;
                Ok(rows_result(vec![document_to_row(&reply)], start))
            }
            "bulkWrite" => self.run_bulk_write(&coll, parsed, start).await,
            other => Err(GatewayError::validation(format!(
                "Unsupported collection operation '{}'",
                other
            ))),
        }
    }

    /// find with chained sort/limit/skip/project, default cap and explain.
    async fn run_find(
        &self,
        coll: &mongodb::Collection<Document>,
        parsed: &ParsedMongoQuery,
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let filter = optional_document(&parsed.args, 0)?;
        let chain = FindChain::from_chain(&parsed.chain)?;
        let projection = match self.find_projection(&parsed.args)? {
            Some(projection) => Some(projection),
            None => chain.projection.clone(),
        };

        if options.explain {
            return self
                .run_find_explain(coll, filter, projection, &chain, start)
                .await;
        }

        let mut action = coll.find(filter);
        if let Some(projection) = projection {
            action = action.projection(projection);
        }
        if let Some(sort) = chain.sort {
            action = action.sort(sort);
        }
        if let Some(skip) = chain.skip {
            action = action.skip(skip);
        }
        let user_limit = chain.limit.or(options.limit.map(i64::from));
        match user_limit {
            Some(limit) => action = action.limit(limit),
            None => {
                if let Some(default_cap) = options.effective_limit(self.settings.default_limit) {
                    action = action.limit(i64::from(default_cap));
                }
            }
        }
        action = action.max_time(self.settings.query_timeout);

        let mut documents = Vec::new();
        let mut session_guard = self.session.lock().await;
        match session_guard.as_mut() {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                while let Some(document) = cursor.next(session).await {
                    documents.push(document?);
                }
            }
            None => {
                let mut cursor = action.await?;
                while let Some(document) = cursor.next().await {
                    documents.push(document?);
                }
            }
        }
        drop(session_guard);

        let rows: Vec<_> = documents.iter().map(document_to_row).collect();
        Ok(rows_result(rows, start))
    }

    async fn run_find_explain(
        &self,
        coll: &mongodb::Collection<Document>,
        filter: Document,
        projection: Option<Document>,
        chain: &FindChain,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let mut find_command = doc! { "find": coll.name(), "filter": filter };
        if let Some(projection) = projection {
            find_command.insert("projection", projection);
        }
        if let Some(sort) = &chain.sort {
            find_command.insert("sort", sort.clone());
        }
        if let Some(limit) = chain.limit {
            find_command.insert("limit", limit);
        }
        if let Some(skip) = chain.skip {
            find_command.insert("skip", skip as i64);
        }
        let client = self.client().await?;
        let reply = client
            .database(coll.namespace().db.as_str())
            .run_command(doc! { "explain": find_command, "verbosity": "executionStats" })
            .await?;
        Ok(rows_result(vec![document_to_row(&reply)], start))
    }

    /// aggregate with chained stages appended in order.
    async fn run_aggregate(
        &self,
        coll: &mongodb::Collection<Document>,
        parsed: &ParsedMongoQuery,
        options: &QueryOptions,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let JsonValue::Array(stages) = parsed
            .args
            .first()
            .ok_or_else(|| GatewayError::validation("aggregate expects a pipeline array"))?
        else {
            return Err(GatewayError::validation(
                "aggregate expects a pipeline array",
            ));
        };
        let mut pipeline = stages
            .iter()
            .map(value_to_document)
            .collect::<GatewayResult<Vec<_>>>()?;

        let mut user_limited = pipeline.iter().any(|stage| stage.contains_key("$limit"));
        for call in &parsed.chain {
            match call.name.as_str() {
                "sort" => pipeline.push(doc! { "$sort": optional_document(&call.args, 0)? }),
                "limit" => {
                    pipeline.push(doc! { "$limit": int_arg(&call.args, 0, "limit")? });
                    user_limited = true;
                }
                "skip" => pipeline.push(doc! { "$skip": int_arg(&call.args, 0, "skip")? }),
                "project" => {
                    pipeline.push(doc! { "$project": optional_document(&call.args, 0)? })
                }
                "count" | "toArray" => {
                    return Err(GatewayError::validation(format!(
                        "'.{}()' is unnecessary here; results are materialized automatically",
                        call.name
                    )))
                }
                other => {
                    return Err(GatewayError::validation(format!(
                        "Unsupported chained method '{}'",
                        other
                    )))
                }
            }
        }
        if !user_limited {
            if let Some(default_cap) = options.effective_limit(self.settings.default_limit) {
                pipeline.push(doc! { "$limit": i64::from(default_cap) });
            }
        }

        if options.explain {
            let client = self.client().await?;
            let stages: Vec<Bson> = pipeline.into_iter().map(Bson::Document).collect();
            let reply = client
                .database(coll.namespace().db.as_str())
                .run_command(doc! {
                    "explain": { "aggregate": coll.name(), "pipeline": stages, "cursor": {} },
                    "verbosity": "executionStats"
                })
                .await?;
            return Ok(rows_result(vec![document_to_row(&reply)], start));
        }

        let action = coll
            .aggregate(pipeline)
            .max_time(self.settings.query_timeout);
        let mut rows = Vec::new();
        let mut session_guard = self.session.lock().await;
        match session_guard.as_mut() {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                while let Some(document) = cursor.next(session).await {
                    rows.push(document_to_row(&document?));
                }
            }
            None => {
                let mut cursor = action.await?;
                while let Some(document) = cursor.next().await {
                    rows.push(document_to_row(&document?));
                }
            }
        }
        drop(session_guard);
        Ok(rows_result(rows, start))
    }

    /// bulkWrite dispatched as individual operations, aggregating counts.
    async fn run_bulk_write(
        &self,
        coll: &mongodb::Collection<Document>,
        parsed: &ParsedMongoQuery,
        start: Instant,
    ) -> GatewayResult<QueryResult> {
        let JsonValue::Array(operations) = parsed
            .args
            .first()
            .ok_or_else(|| GatewayError::validation("bulkWrite expects an array of operations"))?
        else {
            return Err(GatewayError::validation(
                "bulkWrite expects an array of operations",
            ));
        };

        let mut inserted = 0u64;
        let mut modified = 0u64;
        let mut deleted = 0u64;
        for op in operations {
            let op = value_to_document(op)?;
            if let Ok(spec) = op.get_document("insertOne") {
                let document = spec.get_document("document").map_err(|_| {
                    GatewayError::validation("insertOne in bulkWrite expects a 'document' field")
                })?;
                coll.insert_one(document.clone()).await?;
                inserted += 1;
            } else if let Ok(spec) = op.get_document("updateOne") {
                let outcome = coll
                    .update_one(
                        spec.get_document("filter").cloned().unwrap_or_default(),
                        spec.get_document("update").cloned().unwrap_or_default(),
                    )
                    .await?;
                modified += outcome.modified_count;
            } else if let Ok(spec) = op.get_document("updateMany") {
                let outcome = coll
                    .update_many(
                        spec.get_document("filter").cloned().unwrap_or_default(),
                        spec.get_document("update").cloned().unwrap_or_default(),
                    )
                    .await?;
                modified += outcome.modified_count;
            } else if let Ok(spec) = op.get_document("deleteOne") {
                let outcome = coll
                    .delete_one(spec.get_document("filter").cloned().unwrap_or_default())
                    .await?;
                deleted += outcome.deleted_count;
            } else if let Ok(spec) = op.get_document("deleteMany") {
                let outcome = coll
                    .delete_many(spec.get_document("filter").cloned().unwrap_or_default())
                    .await?;
                deleted += outcome.deleted_count;
            } else {
                return Err(GatewayError::validation(
                    "Unsupported bulkWrite operation; use insertOne/updateOne/updateMany/deleteOne/deleteMany",
                ));
            }
        }

        let mut row = serde_json::Map::new();
        row.insert("acknowledged".into(), JsonValue::Bool(true));
        row.insert("insertedCount".into(), JsonValue::Number(inserted.into()));
        row.insert("modifiedCount".into(), JsonValue::Number(modified.into()));
        row.insert("deletedCount".into(), JsonValue::Number(deleted.into()));
        Ok(QueryResult::command(row, elapsed(start)))
    }

    /// Interpret `find`'s second argument as a projection iff it is a
    /// non-empty object carrying no reserved option keys.
    fn find_projection(&self, args: &[JsonValue]) -> GatewayResult<Option<Document>> {
        let Some(JsonValue::Object(map)) = args.get(1) else {
            return Ok(None);
        };
        if map.is_empty() || map.keys().any(|k| RESERVED_FIND_OPTIONS.contains(&k.as_str())) {
            return Ok(None);
        }
        Ok(Some(value_to_document(&JsonValue::Object(map.clone()))?))
    }

    fn simulate(
        &self,
        options: &QueryOptions,
        operation: &str,
        start: Instant,
    ) -> Option<QueryResult> {
        if self.is_default_connection && !options.allow_destructive {
            info!(operation = %operation, "Simulating destructive operation");
            Some(QueryResult::simulated(operation, elapsed(start)))
        } else {
            None
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub async fn begin_transaction(&self) -> GatewayResult<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Err(GatewayError::validation("A transaction is already active"));
        }
        let client = self.client().await?;
        let mut session = client.start_session().await?;
        session.start_transaction().await?;
        *guard = Some(session);
        info!("Transaction started (MongoDB)");
        Ok(())
    }

    pub async fn commit_transaction(&self) -> GatewayResult<()> {
        let mut session = self
            .session
            .lock()
            .await
            .take()
            .ok_or_else(|| GatewayError::validation("No active transaction"))?;
        session.commit_transaction().await?;
        info!("Transaction committed (MongoDB)");
        Ok(())
    }

    pub async fn rollback_transaction(&self) -> GatewayResult<()> {
        let mut session = self
            .session
            .lock()
            .await
            .take()
            .ok_or_else(|| GatewayError::validation("No active transaction"))?;
        session.abort_transaction().await?;
        info!("Transaction aborted (MongoDB)");
        Ok(())
    }

    pub async fn is_transaction_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// List non-system databases.
    pub async fn get_databases(&self) -> GatewayResult<Vec<String>> {
        let client = self.client().await?;
        let names = client.list_database_names().await?;
        Ok(names
            .into_iter()
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .collect())
    }

    /// List collections in a database.
    pub async fn get_tables(&self, database: &str) -> GatewayResult<Vec<TableInfo>> {
        let client = self.client().await?;
        let mut names = client.database(database).list_collection_names().await?;
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| TableInfo::new(name, TableType::Collection))
            .collect())
    }

    /// Infer fields of a collection from a bounded document sample.
    pub async fn get_columns(
        &self,
        database: &str,
        collection: &str,
    ) -> GatewayResult<Vec<ColumnInfo>> {
        let client = self.client().await?;
        let coll = client.database(database).collection::<Document>(collection);

        let mut cursor = coll
            .find(doc! {})
            .limit(i64::from(self.settings.schema_sample_size))
            .await?;
        let mut fields: Vec<(String, &'static str)> = Vec::new();
        while let Some(document) = cursor.next().await {
            let document = document?;
            for (key, value) in &document {
                if !fields.iter().any(|(name, _)| name == key) {
                    fields.push((key.clone(), bson_kind_name(value)));
                }
            }
        }

        Ok(fields
            .into_iter()
            .map(|(name, type_name)| ColumnInfo {
                primary_key: name == "_id",
                name,
                type_name: type_name.to_string(),
                nullable: true,
            })
            .collect())
    }

    // =========================================================================
    // Tenant cleanup
    // =========================================================================

    /// Drop one database.
    pub async fn cleanup_database(&self, database: &str) -> GatewayResult<()> {
        let client = self.client().await?;
        client.database(database).drop().await?;
        info!(database = %database, "Dropped MongoDB database");
        Ok(())
    }

    /// Drop every non-system database. Per-database errors are logged and do
    /// not abort the loop. Returns the names that were dropped.
    pub async fn drop_all_user_databases(&self) -> GatewayResult<Vec<String>> {
        let names = self.get_databases().await?;
        let mut dropped = Vec::new();
        for name in names {
            match self.cleanup_database(&name).await {
                Ok(()) => dropped.push(name),
                Err(e) => warn!(database = %name, error = %e, "Failed to drop database"),
            }
        }
        Ok(dropped)
    }
}

/// Chained methods recognized on `find` cursors.
#[derive(Default)]
struct FindChain {
    sort: Option<Document>,
    limit: Option<i64>,
    skip: Option<u64>,
    projection: Option<Document>,
}

impl FindChain {
    fn from_chain(chain: &[ChainCall]) -> GatewayResult<Self> {
        let mut parsed = FindChain::default();
        for call in chain {
            match call.name.as_str() {
                "sort" => parsed.sort = Some(optional_document(&call.args, 0)?),
                "limit" => parsed.limit = Some(int_arg(&call.args, 0, "limit")?),
                "skip" => parsed.skip = Some(int_arg(&call.args, 0, "skip")? as u64),
                "project" => parsed.projection = Some(optional_document(&call.args, 0)?),
                "count" | "toArray" => {
                    return Err(GatewayError::validation(format!(
                        "'.{}()' is unnecessary here; results are materialized automatically",
                        call.name
                    )))
                }
                other => {
                    return Err(GatewayError::validation(format!(
                        "Unsupported chained method '{}'",
                        other
                    )))
                }
            }
        }
        Ok(parsed)
    }
}

fn elapsed(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Build a tabular result from document rows, inferring columns from the
/// union of top-level keys; each column's type comes from the first document
/// where the key is defined.
fn rows_result(rows: Vec<serde_json::Map<String, JsonValue>>, start: Instant) -> QueryResult {
    let columns = infer_columns(&rows);
    QueryResult::from_rows(rows, columns, elapsed(start))
}

fn infer_columns(rows: &[serde_json::Map<String, JsonValue>]) -> Vec<ColumnMeta> {
    let mut columns: Vec<ColumnMeta> = Vec::new();
    for row in rows {
        for (key, value) in row {
            match columns.iter_mut().find(|c| &c.name == key) {
                Some(column) => {
                    if column.type_name == "null" && !value.is_null() {
                        column.type_name = json_kind_name(value).to_string();
                    }
                }
                None => columns.push(ColumnMeta::new(key.clone(), json_kind_name(value))),
            }
        }
    }
    columns
}

fn json_kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_f64() => "double",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn document_to_row(document: &Document) -> serde_json::Map<String, JsonValue> {
    document
        .iter()
        .map(|(key, value)| (key.clone(), bson_to_json(value)))
        .collect()
}

/// Convert a BSON value to JSON for the wire.
pub fn bson_to_json(value: &Bson) -> JsonValue {
    match value {
        Bson::Null => JsonValue::Null,
        Bson::Boolean(b) => JsonValue::Bool(*b),
        Bson::Int32(i) => JsonValue::Number((*i).into()),
        Bson::Int64(i) => JsonValue::Number((*i).into()),
        Bson::Double(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Bson::String(s) => JsonValue::String(s.clone()),
        Bson::ObjectId(oid) => JsonValue::String(oid.to_hex()),
        Bson::DateTime(dt) => JsonValue::String(
            dt.try_to_rfc3339_string()
                .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        ),
        Bson::Decimal128(d) => JsonValue::String(d.to_string()),
        Bson::Array(items) => JsonValue::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(document) => JsonValue::Object(
            document
                .iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        Bson::Binary(bin) => JsonValue::String(format!("<binary {} bytes>", bin.bytes.len())),
        Bson::RegularExpression(re) => {
            JsonValue::String(format!("/{}/{}", re.pattern, re.options))
        }
        Bson::Timestamp(ts) => {
            JsonValue::String(format!("Timestamp({}, {})", ts.time, ts.increment))
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn string_arg(args: &[JsonValue], index: usize, operation: &str) -> GatewayResult<String> {
    args.get(index)
        .and_then(JsonValue::as_str)
        .map(String::from)
        .ok_or_else(|| {
            GatewayError::validation(format!("{} expects a string argument", operation))
        })
}

fn int_arg(args: &[JsonValue], index: usize, name: &str) -> GatewayResult<i64> {
    args.get(index)
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| GatewayError::validation(format!("{} expects an integer argument", name)))
}

/// An update argument may be a document or an aggregation pipeline.
fn update_argument(args: &[JsonValue], index: usize) -> GatewayResult<mongodb::options::UpdateModifications> {
    use mongodb::options::UpdateModifications;
    match args.get(index) {
        Some(JsonValue::Array(stages)) => {
            let pipeline = stages
                .iter()
                .map(value_to_document)
                .collect::<GatewayResult<Vec<_>>>()?;
            Ok(UpdateModifications::Pipeline(pipeline))
        }
        Some(value) => Ok(UpdateModifications::Document(value_to_document(value)?)),
        None => Err(GatewayError::validation("Update expects an update document")),
    }
}

fn update_row(outcome: &mongodb::results::UpdateResult) -> serde_json::Map<String, JsonValue> {
    let mut row = serde_json::Map::new();
    row.insert("acknowledged".into(), JsonValue::Bool(true));
    row.insert(
        "matchedCount".into(),
        JsonValue::Number(outcome.matched_count.into()),
    );
    row.insert(
        "modifiedCount".into(),
        JsonValue::Number(outcome.modified_count.into()),
    );
    if let Some(upserted) = &outcome.upserted_id {
        row.insert("upsertedId".into(), bson_to_json(upserted));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> serde_json::Map<String, JsonValue> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_infer_columns_union_of_keys() {
        let rows = vec![
            row(json!({"name": "A", "age": 10})),
            row(json!({"name": "B", "city": "Oslo"})),
        ];
        let columns = infer_columns(&rows);
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age", "city"]);
    }

    #[test]
    fn test_infer_columns_type_from_first_defined() {
        let rows = vec![
            row(json!({"v": null})),
            row(json!({"v": 3})),
        ];
        let columns = infer_columns(&rows);
        assert_eq!(columns[0].type_name, "int");
    }

    #[test]
    fn test_infer_columns_scalar_kinds() {
        let rows = vec![row(json!({
            "s": "x", "i": 1, "d": 1.5, "b": true, "a": [1], "o": {"k": 1}
        }))];
        let columns = infer_columns(&rows);
        let types: Vec<(&str, &str)> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.type_name.as_str()))
            .collect();
        assert!(types.contains(&("s", "string")));
        assert!(types.contains(&("i", "int")));
        assert!(types.contains(&("d", "double")));
        assert!(types.contains(&("b", "bool")));
        assert!(types.contains(&("a", "array")));
        assert!(types.contains(&("o", "object")));
    }

    #[test]
    fn test_bson_to_json_object_id_as_hex() {
        let oid = mongodb::bson::oid::ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            bson_to_json(&Bson::ObjectId(oid)),
            JsonValue::String("507f1f77bcf86cd799439011".into())
        );
    }

    #[test]
    fn test_bson_to_json_nested() {
        let value = Bson::Document(doc! { "a": [1, {"b": true}] });
        assert_eq!(bson_to_json(&value), json!({"a": [1, {"b": true}]}));
    }

    #[test]
    fn test_find_chain_parses_in_order() {
        let chain = vec![
            ChainCall {
                name: "sort".into(),
                args: vec![json!({"name": 1})],
            },
            ChainCall {
                name: "limit".into(),
                args: vec![json!(5)],
            },
            ChainCall {
                name: "skip".into(),
                args: vec![json!(2)],
            },
        ];
        let parsed = FindChain::from_chain(&chain).unwrap();
        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.skip, Some(2));
        assert!(parsed.sort.is_some());
    }

    #[test]
    fn test_find_chain_rejects_count_and_unknown() {
        let count = vec![ChainCall {
            name: "count".into(),
            args: vec![],
        }];
        assert!(FindChain::from_chain(&count).is_err());

        let unknown = vec![ChainCall {
            name: "explainPlease".into(),
            args: vec![],
        }];
        assert!(FindChain::from_chain(&unknown).is_err());
    }

    #[tokio::test]
    async fn test_projection_rules() {
        let adapter = MongoAdapter::new(AdapterSettings::default(), false);
        // Non-empty plain object: projection
        let projection = adapter
            .find_projection(&[json!({}), json!({"name": 1, "_id": 0})])
            .unwrap();
        assert!(projection.is_some());
        // Empty object: not a projection
        assert!(adapter.find_projection(&[json!({}), json!({})]).unwrap().is_none());
        // Reserved option keys: not a projection
        assert!(adapter
            .find_projection(&[json!({}), json!({"limit": 5})])
            .unwrap()
            .is_none());
        // Missing second argument
        assert!(adapter.find_projection(&[json!({})]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deprecated_operations_named_replacement() {
        let adapter = MongoAdapter::new(AdapterSettings::default(), false);
        let parsed = parse_mongo_query("db.users.insert({a: 1})").unwrap();
        let err = adapter
            .dispatch_collection(&parsed, "test", &QueryOptions::default(), Instant::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insertOne"));
    }

    #[tokio::test]
    async fn test_simulation_for_drop_database() {
        let adapter = MongoAdapter::new(AdapterSettings::default(), true);
        let result = adapter
            .simulate(&QueryOptions::default(), "dropDatabase", Instant::now())
            .unwrap();
        assert!(result.is_simulated());

        let bypass = QueryOptions {
            allow_destructive: true,
            ..Default::default()
        };
        assert!(adapter.simulate(&bypass, "dropDatabase", Instant::now()).is_none());
    }

    #[tokio::test]
    async fn test_query_fails_when_disconnected() {
        let adapter = MongoAdapter::new(AdapterSettings::default(), false);
        let result = adapter
            .execute_query("db.users.find({})", None, &QueryOptions::default())
            .await;
        assert!(result.is_err());
    }
}
