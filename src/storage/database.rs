//! SQLite database management with migrations
//!
//! Structured storage for workspaces, items, queries and interactions

use super::{
    FeedbackStats, InteractionRecord, ItemRecord, NewInteraction, QueryEmbedding, Usefulness,
};
use crate::error::{AmemError, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AmemError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Per-connection pragmas; journal mode is persistent and set once below
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(8).build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    pub fn ensure_workspace(&self, name: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO workspaces (name, created_ts) VALUES (?1, ?2)",
            params![name, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn workspaces(&self) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT name FROM workspaces ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Insert an item or refresh its metadata; bumps its revision either way
    pub fn upsert_item(&self, item: &ItemRecord) -> Result<()> {
        let concepts = serde_json::to_string(&item.concepts).map_err(|e| AmemError::Json {
            source: e,
            context: format!("Failed to encode concepts of {}", item.item_id),
        })?;

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO items
                (item_id, workspace, path, content_hash, concepts, freshness, created_ts, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, (SELECT COALESCE(MAX(revision), 0) + 1 FROM items))
             ON CONFLICT(item_id) DO UPDATE SET
                concepts = excluded.concepts,
                freshness = excluded.freshness,
                revision = excluded.revision",
            params![
                item.item_id,
                item.workspace,
                item.path,
                item.content_hash,
                concepts,
                item.freshness.map(|f| f.timestamp_millis()),
                item.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_item(&self, item_id: &str) -> Result<Option<ItemRecord>> {
        let conn = self.get_conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE item_id = ?1", ITEM_COLUMNS),
                params![item_id],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn latest_item_by_path(&self, workspace: &str, path: &str) -> Result<Option<ItemRecord>> {
        let conn = self.get_conn()?;
        let item = conn
            .query_row(
                &format!(
                    "SELECT {} FROM items WHERE workspace = ?1 AND path = ?2
                     ORDER BY revision DESC LIMIT 1",
                    ITEM_COLUMNS
                ),
                params![workspace, path],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    /// Latest revision of every path in a workspace, in first-ingestion order
    pub fn latest_items(&self, workspace: &str) -> Result<Vec<ItemRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items i
             WHERE workspace = ?1
               AND revision = (SELECT MAX(revision) FROM items j
                               WHERE j.workspace = i.workspace AND j.path = i.path)
             ORDER BY created_ts, revision",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![workspace], item_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Log a query; a duplicate id (same text in the same millisecond) is reused
    pub fn insert_query(
        &self,
        workspace: &str,
        query: &str,
        embedding: Option<QueryEmbedding<'_>>,
        issued: DateTime<Utc>,
    ) -> Result<String> {
        let qhash = query_hash(query);
        let issued_ms = issued.timestamp_millis();
        let qid = format!("{}:{}:{}", workspace, qhash, issued_ms);

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO queries
                (qid, workspace, query, qhash, issued_ts, embedding, embedding_model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                qid,
                workspace,
                query,
                qhash,
                issued_ms,
                embedding.map(|e| encode_vector(e.vector)),
                embedding.map(|e| e.model),
            ],
        )?;
        Ok(qid)
    }

    pub fn query_exists(&self, qid: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row("SELECT 1 FROM queries WHERE qid = ?1", params![qid], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// `(qid, issued, vector)` for every workspace query embedded with `model`
    pub fn query_embeddings(
        &self,
        workspace: &str,
        model: &str,
    ) -> Result<Vec<(String, DateTime<Utc>, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT qid, issued_ts, embedding FROM queries
             WHERE workspace = ?1 AND embedding_model = ?2 AND embedding IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![workspace, model], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    from_millis(row.get(1)?),
                    decode_vector(&bytes),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_interaction(&self, interaction: &NewInteraction) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO interactions (qid, item_id, usefulness, dwell_ms, click_rank, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                interaction.qid,
                interaction.item_id,
                interaction.usefulness.as_i64(),
                interaction.dwell_ms as i64,
                interaction.click_rank as i64,
                interaction.ts.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn item_interactions(
        &self,
        item_id: &str,
        cluster: Option<&[String]>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<InteractionRecord>> {
        let mut sql = String::from(
            "SELECT qid, item_id, usefulness, dwell_ms, click_rank, ts
             FROM interactions WHERE item_id = ?",
        );
        let mut args: Vec<Value> = vec![Value::Text(item_id.to_string())];

        if let Some(qids) = cluster {
            let placeholders = vec!["?"; qids.len()].join(",");
            sql.push_str(&format!(" AND qid IN ({})", placeholders));
            args.extend(qids.iter().map(|q| Value::Text(q.clone())));
        }
        if let Some(since) = since {
            sql.push_str(" AND ts >= ?");
            args.push(Value::Integer(since.timestamp_millis()));
        }
        sql.push_str(" ORDER BY ts, id");

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args), |row| {
                let usefulness: i64 = row.get(2)?;
                Ok(InteractionRecord {
                    qid: row.get(0)?,
                    item_id: row.get(1)?,
                    usefulness: Usefulness::try_from(usefulness).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e))
                    })?,
                    dwell_ms: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64,
                    click_rank: row.get::<_, Option<i64>>(4)?.unwrap_or(0).max(0) as u32,
                    ts: from_millis(row.get(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn workspace_stats(&self, workspace: &str) -> Result<FeedbackStats> {
        let conn = self.get_conn()?;

        let (total_queries, last_activity): (i64, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MAX(issued_ts) FROM queries WHERE workspace = ?1",
            params![workspace],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (total_interactions, avg_useful, avg_dwell, avg_rank): (
            i64,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        ) = conn.query_row(
            "SELECT COUNT(*), AVG(i.usefulness), AVG(i.dwell_ms), AVG(i.click_rank)
             FROM interactions i JOIN queries q ON i.qid = q.qid
             WHERE q.workspace = ?1",
            params![workspace],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let total_items: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE workspace = ?1",
            params![workspace],
            |row| row.get(0),
        )?;

        Ok(FeedbackStats {
            total_queries: total_queries as u64,
            total_interactions: total_interactions as u64,
            avg_useful: avg_useful.unwrap_or(0.0),
            avg_dwell_ms: avg_dwell.unwrap_or(0.0),
            avg_click_rank: avg_rank.unwrap_or(0.0),
            total_items: total_items as u64,
            last_activity: last_activity.map(from_millis),
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            workspace_count: count("workspaces")?,
            item_count: count("items")?,
            query_count: count("queries")?,
            interaction_count: count("interactions")?,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub workspace_count: usize,
    pub item_count: usize,
    pub query_count: usize,
    pub interaction_count: usize,
}

const ITEM_COLUMNS: &str = "item_id, workspace, path, content_hash, concepts, freshness, created_ts";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ItemRecord> {
    let concepts: String = row.get(4)?;
    let concepts: Vec<String> = serde_json::from_str(&concepts)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(ItemRecord {
        item_id: row.get(0)?,
        workspace: row.get(1)?,
        path: row.get(2)?,
        content_hash: row.get(3)?,
        concepts,
        freshness: row.get::<_, Option<i64>>(5)?.map(from_millis),
        created_at: from_millis(row.get(6)?),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// 16 hex character hash of the lowercased query text
fn query_hash(query: &str) -> String {
    let hash = blake3::hash(query.to_lowercase().as_bytes());
    format!("{:.16}", hash.to_hex())
}

/// Little-endian f32 encoding of a vector
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE workspaces (
        name TEXT PRIMARY KEY,
        created_ts INTEGER NOT NULL
    );

    -- Items (keyed by content hash prefix + path)
    CREATE TABLE items (
        item_id TEXT PRIMARY KEY,
        workspace TEXT NOT NULL,
        path TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        concepts TEXT NOT NULL DEFAULT '[]',  -- JSON array of labels
        freshness INTEGER,
        created_ts INTEGER NOT NULL,
        revision INTEGER NOT NULL,
        FOREIGN KEY (workspace) REFERENCES workspaces(name)
    );

    CREATE INDEX idx_items_workspace_path ON items(workspace, path, revision);

    -- Queries with their embeddings
    CREATE TABLE queries (
        qid TEXT PRIMARY KEY,
        workspace TEXT NOT NULL,
        query TEXT NOT NULL,
        qhash TEXT NOT NULL,
        issued_ts INTEGER NOT NULL,
        embedding BLOB,           -- little-endian f32
        embedding_model TEXT,     -- embedding space fingerprint
        FOREIGN KEY (workspace) REFERENCES workspaces(name)
    );

    CREATE INDEX idx_queries_workspace ON queries(workspace, qhash);
    CREATE INDEX idx_queries_model ON queries(workspace, embedding_model);

    -- Interactions (append-only explicit + implicit feedback)
    CREATE TABLE interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        qid TEXT NOT NULL,
        item_id TEXT NOT NULL,
        usefulness INTEGER NOT NULL CHECK (usefulness IN (-1, 0, 1)),
        dwell_ms INTEGER NOT NULL DEFAULT 0,
        click_rank INTEGER NOT NULL DEFAULT 0,
        ts INTEGER NOT NULL,
        FOREIGN KEY (qid) REFERENCES queries(qid),
        FOREIGN KEY (item_id) REFERENCES items(item_id)
    );

    CREATE INDEX idx_interactions_item ON interactions(item_id, ts);
    CREATE INDEX idx_interactions_qid ON interactions(qid, ts);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn database() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        (temp_dir, db)
    }

    fn item(workspace: &str, item_id: &str, path: &str) -> ItemRecord {
        ItemRecord {
            item_id: item_id.to_string(),
            workspace: workspace.to_string(),
            path: path.to_string(),
            content_hash: "0123456789abcdef0123456789abcdef".to_string(),
            concepts: vec!["Auth".to_string()],
            freshness: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/test.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let (_temp, db) = database();
        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_reopen_does_not_reapply_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");

        Database::new(&path).unwrap().ensure_workspace("ws").unwrap();
        let reopened = Database::new(&path).unwrap();
        assert_eq!(reopened.workspaces().unwrap(), vec!["ws"]);
    }

    #[test]
    fn test_foreign_keys_enabled_on_every_connection() {
        let (_temp, db) = database();
        let a = db.get_conn().unwrap();
        let b = db.get_conn().unwrap();

        for conn in [&a, &b] {
            let fk_enabled: i32 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(fk_enabled, 1);
        }
    }

    #[test]
    fn test_interaction_foreign_keys() {
        let (_temp, db) = database();
        db.ensure_workspace("ws").unwrap();
        db.upsert_item(&item("ws", "abc:a.md", "a.md")).unwrap();

        let orphan = NewInteraction::new("ws:none:0", "abc:a.md", Usefulness::Useful);
        assert!(db.insert_interaction(&orphan).is_err());

        let qid = db.insert_query("ws", "hello", None, Utc::now()).unwrap();
        db.insert_interaction(&NewInteraction::new(&qid, "abc:a.md", Usefulness::Useful))
            .unwrap();
        assert_eq!(db.stats().unwrap().interaction_count, 1);
    }

    #[test]
    fn test_duplicate_query_id_is_reused() {
        let (_temp, db) = database();
        db.ensure_workspace("ws").unwrap();
        let now = Utc::now();

        let first = db.insert_query("ws", "JWT", None, now).unwrap();
        let second = db.insert_query("ws", "jwt", None, now).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.stats().unwrap().query_count, 1);
    }

    #[test]
    fn test_interactions_filtered_by_cluster_and_time() {
        let (_temp, db) = database();
        db.ensure_workspace("ws").unwrap();
        db.upsert_item(&item("ws", "abc:a.md", "a.md")).unwrap();

        let now = Utc::now();
        let q1 = db.insert_query("ws", "one", None, now).unwrap();
        let q2 = db.insert_query("ws", "two", None, now).unwrap();

        let old = now - chrono::Duration::days(10);
        db.insert_interaction(&NewInteraction::new(&q1, "abc:a.md", Usefulness::Useful).at(old))
            .unwrap();
        db.insert_interaction(
            &NewInteraction::new(&q2, "abc:a.md", Usefulness::NotUseful)
                .with_dwell(1500)
                .with_rank(2),
        )
        .unwrap();

        let all = db.item_interactions("abc:a.md", None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].usefulness, Usefulness::Useful);

        let cluster = vec![q2.clone()];
        let only_q2 = db.item_interactions("abc:a.md", Some(&cluster), None).unwrap();
        assert_eq!(only_q2.len(), 1);
        assert_eq!(only_q2[0].dwell_ms, 1500);
        assert_eq!(only_q2[0].click_rank, 2);

        let recent = db
            .item_interactions("abc:a.md", None, Some(now - chrono::Duration::days(1)))
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_query_embeddings_roundtrip_blob() {
        let (_temp, db) = database();
        db.ensure_workspace("ws").unwrap();
        let vector = [0.25f32, -0.5, 1.0];

        db.insert_query(
            "ws",
            "q",
            Some(QueryEmbedding { model: "hash-v1:t:3", vector: &vector }),
            Utc::now(),
        )
        .unwrap();

        let rows = db.query_embeddings("ws", "hash-v1:t:3").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2, vector.to_vec());
        assert!(db.query_embeddings("ws", "other").unwrap().is_empty());
    }

    #[test]
    fn test_workspace_stats() {
        let (_temp, db) = database();
        db.ensure_workspace("ws").unwrap();
        db.upsert_item(&item("ws", "abc:a.md", "a.md")).unwrap();

        let empty = db.workspace_stats("ws").unwrap();
        assert_eq!(empty.total_items, 1);
        assert_eq!(empty.total_queries, 0);
        assert!(empty.last_activity.is_none());

        let qid = db.insert_query("ws", "q", None, Utc::now()).unwrap();
        db.insert_interaction(
            &NewInteraction::new(&qid, "abc:a.md", Usefulness::Useful).with_dwell(2000),
        )
        .unwrap();

        let stats = db.workspace_stats("ws").unwrap();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.total_interactions, 1);
        assert_eq!(stats.avg_useful, 1.0);
        assert_eq!(stats.avg_dwell_ms, 2000.0);
        assert!(stats.last_activity.is_some());
    }
}
