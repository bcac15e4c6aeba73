//! Shared fixtures: schemas, an in-memory database and a statement-counting client

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;

use relmap::backends::{DatabaseRow, DatabaseValue, TransactionClient};
use relmap::{
    ClientMode, OrmConfig, OrmResult, QueryBuilder, QueryClient, Record, RelationOptions, Schema,
    SchemaBuilder, SqlDialect, SqliteClient,
};

/// Records every statement sent through it
pub struct CountingClient {
    inner: Arc<dyn QueryClient>,
    log: Arc<Mutex<Vec<String>>>,
}

impl CountingClient {
    pub fn wrap(inner: Arc<dyn QueryClient>) -> (Arc<dyn QueryClient>, StatementLog) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::new(Self {
            inner,
            log: log.clone(),
        });
        (client, StatementLog(log))
    }

    fn record(&self, sql: &str) {
        self.log.lock().unwrap().push(sql.to_string());
    }
}

#[derive(Clone)]
pub struct StatementLog(Arc<Mutex<Vec<String>>>);

impl StatementLog {
    pub fn reset(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryClient for CountingClient {
    fn dialect(&self) -> SqlDialect {
        self.inner.dialect()
    }

    fn mode(&self) -> ClientMode {
        self.inner.mode()
    }

    fn is_transaction(&self) -> bool {
        self.inner.is_transaction()
    }

    fn config(&self) -> &OrmConfig {
        self.inner.config()
    }

    fn query(&self) -> QueryBuilder {
        self.inner.query()
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {

        self.record(sql);
        self.inner.fetch_all(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.record(sql);
        self.inner.execute(sql, params).await
    }

    async fn transaction(&self) -> OrmResult<Arc<dyn TransactionClient>> {
        let inner = self.inner.transaction().await?;
        Ok(Arc::new(CountingTransaction {
            inner,
            log: self.log.clone(),
        }))
    }
}

struct CountingTransaction {
    inner: Arc<dyn TransactionClient>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TransactionClient for CountingTransaction {
    fn client(self: Arc<Self>) -> Arc<dyn QueryClient> {
        Arc::new(CountingClient {
            inner: self.inner.clone().client(),
            log: self.log.clone(),
        })
    }

    async fn commit(&self) -> OrmResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.inner.rollback().await
    }
}

pub static COUNTRY: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Country", "countries")
        .columns(&["id", "name"])
        .has_many_through("posts", || POST.clone(), || USER.clone(), RelationOptions::new())
        .build()
});

pub static USER: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("User", "users")
        .columns(&["id", "name", "country_id"])
        .has_many("posts", || POST.clone(), RelationOptions::new())
        .has_one("profile", || PROFILE.clone(), RelationOptions::new())
        .many_to_many(
            "roles",
            || ROLE.clone(),
            RelationOptions::new().pivot_columns(&["granted_by"]),
        )
        .belongs_to("country", || COUNTRY.clone(), RelationOptions::new())
        .build()
});

pub static PROFILE: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Profile", "profiles")
        .columns(&["id", "user_id", "bio"])
        .belongs_to("user", || USER.clone(), RelationOptions::new())
        .build()
});

pub static POST: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Post", "posts")
        .columns(&["id", "user_id", "title"])
        .belongs_to("user", || USER.clone(), RelationOptions::new())
        .morph_many(
            "comments",
            || COMMENT.clone(),
            RelationOptions::new().morph_name("commentable"),
        )
        .build()
});

pub static ROLE: Lazy<Arc<Schema>> =
    Lazy::new(|| SchemaBuilder::new("Role", "roles").columns(&["id", "name"]).build());

pub static VIDEO: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Video", "videos")
        .columns(&["id", "title"])
        .morph_many(
            "comments",
            || COMMENT.clone(),
            RelationOptions::new().morph_name("commentable"),
        )
        .morph_to_many("tags", || TAG.clone(), RelationOptions::new().morph_name("taggable"))
        .build()
});

pub static ARTICLE: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Article", "articles")
        .columns(&["id", "title"])
        .morph_to_many("tags", || TAG.clone(), RelationOptions::new().morph_name("taggable"))
        .build()
});

pub static TAG: Lazy<Arc<Schema>> =
    Lazy::new(|| SchemaBuilder::new("Tag", "tags").columns(&["id", "name"]).build());

pub static COMMENT: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Comment", "comments")
        .columns(&["id", "body", "commentable_type", "commentable_id"])
        .morph_to(
            "commentable",
            RelationOptions::new()
                .morph_target(|| POST.clone())
                .morph_target(|| VIDEO.clone()),
        )
        .build()
});

pub static CATEGORY: Lazy<Arc<Schema>> = Lazy::new(|| {
    SchemaBuilder::new("Category", "categories")
        .columns(&["id", "parent_id", "name"])
        .has_many(
            "children",
            || CATEGORY.clone(),
            RelationOptions::new().foreign_key("parent_id"),
        )
        .has_many_through(
            "grandchildren",
            || CATEGORY.clone(),
            || CATEGORY.clone(),
            RelationOptions::new()
                .foreign_key("parent_id")
                .through_foreign_key("parent_id"),
        )
        .build()
});

const TABLES: &[&str] = &[
    "CREATE TABLE countries (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, country_id INTEGER)",
    "CREATE TABLE profiles (id INTEGER PRIMARY KEY, user_id INTEGER, bio TEXT)",
    "CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER, title TEXT NOT NULL)",
    "CREATE TABLE roles (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE role_user (user_id INTEGER NOT NULL, role_id INTEGER NOT NULL, granted_by TEXT)",
    "CREATE TABLE videos (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
    "CREATE TABLE comments (id INTEGER PRIMARY KEY, body TEXT NOT NULL, \
     commentable_type TEXT, commentable_id INTEGER)",
    "CREATE TABLE categories (id INTEGER PRIMARY KEY, parent_id INTEGER, name TEXT NOT NULL)",
    "CREATE TABLE articles (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
    "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE taggables (taggable_id INTEGER NOT NULL, taggable_type TEXT NOT NULL, \
     tag_id INTEGER NOT NULL)",
];

/// Test log output, filtered by RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh in-memory database with every fixture table, behind a counting client
pub async fn database() -> (Arc<dyn QueryClient>, StatementLog) {
    init_tracing();
    let sqlite = SqliteClient::in_memory(OrmConfig::default()).await.unwrap();
    for ddl in TABLES {
        sqlite.execute(ddl, &[]).await.unwrap();
    }
    CountingClient::wrap(Arc::new(sqlite))
}

/// Run raw setup statements
pub async fn seed(client: &Arc<dyn QueryClient>, statements: &[&str]) {
    for sql in statements {
        client.execute(sql, &[]).await.unwrap();
    }
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    let mut ids: Vec<i64> = records
        .iter()
        .filter_map(|record| record.get("id").and_then(Value::as_i64))
        .collect();
    ids.sort_unstable();
    ids
}

pub fn id(record: &Record) -> i64 {
    record.get("id").and_then(Value::as_i64).unwrap()
}
