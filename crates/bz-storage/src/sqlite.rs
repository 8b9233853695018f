use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use bz_core::*;

/// File name of the database inside the configured data directory.
pub const DATABASE_FILE_NAME: &str = "bazaar.sqlite";

/// SQLite WAL mode supports 1 writer + N readers, so a small pool keeps
/// concurrent list queries from queueing behind each other.
const DEFAULT_POOL_SIZE: usize = 4;

const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../../../migrations/001_initial.sql")),
    (2, include_str!("../../../migrations/002_changelog.sql")),
];

/// Document store over a single `records` table. Each document is kept as a
/// JSON object and queried with SQLite's JSON functions.
///
/// Writes are serialized through `writer`, and each write publishes its change
/// events before releasing it, so subscribers see events in commit order.
pub struct SqliteRecordStore {
    pool: Vec<Mutex<Connection>>,
    next_slot: AtomicUsize,
    writer: Mutex<()>,
    changes: Option<broadcast::Sender<LiveEvent>>,
}

impl SqliteRecordStore {
    /// Run a synchronous closure on the next pooled connection. The guard is
    /// released before the caller awaits anything, so futures stay `Send`.
    fn with_conn<F, T>(&self, f: F) -> BzResult<T>
    where
        F: FnOnce(&Connection) -> BzResult<T>,
    {
        let idx = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let conn = self.pool[idx]
            .lock()
            .map_err(|e| BzError::Storage(e.to_string()))?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction while holding the writer lock.
    /// Events pushed by `f` are published after the commit, still under the
    /// lock.
    fn with_writer<F, T>(&self, f: F) -> BzResult<T>
    where
        F: FnOnce(&Transaction<'_>, &mut Vec<LiveEvent>) -> BzResult<T>,
    {
        let _writer = self
            .writer
            .lock()
            .map_err(|e| BzError::Storage(e.to_string()))?;
        let mut events = Vec::new();
        let out = self.with_conn(|conn| {
            let tx = begin(conn)?;
            let out = f(&tx, &mut events)?;
            tx.commit().map_err(storage_err)?;
            Ok(out)
        })?;
        if let Some(changes) = &self.changes {
            for event in events {
                // No subscribers is not an error.
                let _ = changes.send(event);
            }
        }
        Ok(out)
    }

    fn open_connection(path: &Path) -> BzResult<Connection> {
        let conn = Connection::open(path)
            .map_err(|e| BzError::Storage(format!("failed to open sqlite: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| BzError::Storage(format!("pragma error: {e}")))?;
        register_functions(&conn)?;
        Ok(conn)
    }

    fn from_pool(pool: Vec<Mutex<Connection>>) -> BzResult<Self> {
        let store = Self {
            pool,
            next_slot: AtomicUsize::new(0),
            writer: Mutex::new(()),
            changes: None,
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn open(path: &Path) -> BzResult<Self> {
        let mut pool = Vec::with_capacity(DEFAULT_POOL_SIZE);
        for _ in 0..DEFAULT_POOL_SIZE {
            pool.push(Mutex::new(Self::open_connection(path)?));
        }
        let store = Self::from_pool(pool)?;
        tracing::debug!(path = %path.display(), "record store opened");
        Ok(store)
    }

    /// A private in-memory database. It lives on a single connection: shared
    /// cache connections lock whole tables and fail with `SQLITE_LOCKED`
    /// instead of waiting.
    pub fn open_in_memory() -> BzResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BzError::Storage(format!("failed to open in-memory sqlite: {e}")))?;
        register_functions(&conn)?;
        Self::from_pool(vec![Mutex::new(conn)])
    }

    /// Publish every committed write on `tx`.
    pub fn with_change_feed(mut self, tx: broadcast::Sender<LiveEvent>) -> Self {
        self.changes = Some(tx);
        self
    }

    fn run_migrations(&self) -> BzResult<()> {
        let conn = self.pool[0]
            .lock()
            .map_err(|e| BzError::Storage(e.to_string()))?;

        // 001 creates schema_version, so it always runs.
        conn.execute_batch(MIGRATIONS[0].1)
            .map_err(|e| BzError::Storage(format!("migration 001 failed: {e}")))?;

        let max_version: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;

        for &(version, sql) in &MIGRATIONS[1..] {
            if version <= max_version {
                continue;
            }
            conn.execute_batch(sql)
                .map_err(|e| BzError::Storage(format!("migration {version:03} failed: {e}")))?;
        }

        tracing::debug!(
            applied_up_to = MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0),
            "migrations complete"
        );
        Ok(())
    }

    /// Document count per table, for diagnostics.
    pub fn table_counts(&self) -> BzResult<Vec<(String, usize)>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT tbl, COUNT(*) FROM records GROUP BY tbl ORDER BY tbl")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(storage_err)?;
            rows.map(|row| {
                row.map(|(tbl, n)| (tbl, usize::try_from(n).unwrap_or(0)))
                    .map_err(storage_err)
            })
            .collect()
        })
    }

    pub fn changelog_len(&self) -> BzResult<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM changelog", [], |row| row.get(0))
                .map_err(storage_err)?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    fn edit_array<F>(&self, id: &RecordId, field: &str, edit: F) -> BzResult<Option<Document>>
    where
        F: FnOnce(&mut Vec<Value>),
    {
        json_path(field)?;
        let doc = self.with_writer(|tx, events| {
            let Some(mut doc) = read_doc(tx, id)? else {
                return Ok(None);
            };
            let slot = doc
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let items = slot
                .as_array_mut()
                .ok_or_else(|| BzError::InvalidInput(format!("{field} is not a list")))?;
            edit(items);
            doc.insert("updated_at".into(), Value::String(now_timestamp()));
            write_doc(tx, id, &doc)?;
            log_change(tx, id.table(), &id.to_string(), "update", Some(&json!({ "field": field })))?;
            events.push(LiveEvent::new(ChangeAction::Update, id.table(), doc.clone()));
            Ok(Some(doc))
        })?;

        if doc.is_some() {
            tracing::debug!(record = %id, field, "array field updated");
        }
        Ok(doc)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, id: &RecordId, mut fields: Document) -> BzResult<Document> {
        let now = now_timestamp();
        fields.insert("id".into(), Value::from(id));
        fields.insert("created_at".into(), Value::String(now.clone()));
        fields.insert("updated_at".into(), Value::String(now.clone()));
        let data = serde_json::to_string(&fields)?;

        self.with_writer(|tx, events| {
            tx.execute(
                "INSERT INTO records (tbl, id, data_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.table().as_str(), id.to_string(), data, now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(failure, _)
                    if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    BzError::InvalidInput(format!("{id} already exists"))
                }
                other => storage_err(other),
            })?;
            log_change(tx, id.table(), &id.to_string(), "create", None)?;
            events.push(LiveEvent::new(ChangeAction::Create, id.table(), fields.clone()));
            Ok(())
        })?;

        tracing::debug!(record = %id, "record created");
        Ok(fields)
    }

    async fn select(&self, id: &RecordId) -> BzResult<Option<Document>> {
        self.with_conn(|conn| read_doc(conn, id))
    }

    async fn exists(&self, id: &RecordId) -> BzResult<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM records WHERE tbl = ?1 AND id = ?2",
                params![id.table().as_str(), id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(storage_err)
        })
    }

    async fn patch(&self, id: &RecordId, ops: &[PatchOp]) -> BzResult<Document> {
        let doc = self.with_writer(|tx, events| {
            let mut doc = read_doc(tx, id)?.ok_or_else(|| BzError::NotFound(id.clone()))?;
            apply_patch(&mut doc, ops)?;
            write_doc(tx, id, &doc)?;
            let diff = serde_json::to_value(ops)?;
            log_change(tx, id.table(), &id.to_string(), "update", Some(&diff))?;
            events.push(LiveEvent::new(ChangeAction::Update, id.table(), doc.clone()));
            Ok(doc)
        })?;

        tracing::debug!(record = %id, ops = ops.len(), "record patched");
        Ok(doc)
    }

    async fn delete(&self, id: &RecordId) -> BzResult<Option<Document>> {
        let doc = self.with_writer(|tx, events| {
            let Some(doc) = read_doc(tx, id)? else {
                return Ok(None);
            };
            tx.execute(
                "DELETE FROM records WHERE tbl = ?1 AND id = ?2",
                params![id.table().as_str(), id.to_string()],
            )
            .map_err(storage_err)?;
            log_change(tx, id.table(), &id.to_string(), "delete", None)?;
            events.push(LiveEvent::new(ChangeAction::Delete, id.table(), doc.clone()));
            Ok(Some(doc))
        })?;

        if doc.is_some() {
            tracing::debug!(record = %id, "record deleted");
        }
        Ok(doc)
    }

    async fn list(&self, query: &ListQuery) -> BzResult<Vec<Document>> {
        self.with_conn(|conn| {
            let mut params = SqlParams::default();
            let filter = where_clause(query.table, &query.conditions, &mut params)?;
            let order = if query.order_by == DEFAULT_ORDER_FIELD {
                "created_at".to_string()
            } else {
                format!(
                    "json_extract(data_json, {})",
                    params.push(json_path(&query.order_by)?)
                )
            };
            let dir = query.direction.as_sql();
            let limit = query
                .limit
                .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
            let start = i64::try_from(query.start).unwrap_or(i64::MAX);

            let sql = format!(
                "SELECT data_json FROM records WHERE {filter}
                 ORDER BY {order} {dir}, rowid {dir} LIMIT {} OFFSET {}",
                params.push(limit),
                params.push(start),
            );

            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params.as_refs().as_slice(), |row| row.get::<_, String>(0))
                .map_err(storage_err)?;

            let mut docs = Vec::new();
            for row in rows {
                docs.push(parse_doc(&row.map_err(storage_err)?)?);
            }
            Ok(docs)
        })
    }

    async fn count(&self, table: Table, conditions: &[Condition]) -> BzResult<usize> {
        self.with_conn(|conn| {
            let mut params = SqlParams::default();
            let filter = where_clause(table, conditions, &mut params)?;
            let n: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM records WHERE {filter}"),
                    params.as_refs().as_slice(),
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }

    async fn sum(&self, table: Table, field: &str, conditions: &[Condition]) -> BzResult<f64> {
        self.with_conn(|conn| {
            let mut params = SqlParams::default();
            let path = params.push(json_path(field)?);
            let filter = where_clause(table, conditions, &mut params)?;
            conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM(CAST(json_extract(data_json, {path}) AS REAL)), 0.0)
                     FROM records WHERE {filter}"
                ),
                params.as_refs().as_slice(),
                |row| row.get(0),
            )
            .map_err(storage_err)
        })
    }

    async fn array_append(
        &self,
        id: &RecordId,
        field: &str,
        value: Value,
    ) -> BzResult<Option<Document>> {
        self.edit_array(id, field, |items| items.push(value))
    }

    async fn array_remove(
        &self,
        id: &RecordId,
        field: &str,
        matcher: &ArrayMatch,
    ) -> BzResult<Option<Document>> {
        self.edit_array(id, field, |items| items.retain(|item| !matcher.matches(item)))
    }

    async fn delete_where(&self, table: Table, conditions: &[Condition]) -> BzResult<usize> {
        let count = self.with_writer(|tx, events| {
            let mut params = SqlParams::default();
            let filter = where_clause(table, conditions, &mut params)?;
            let rows: Vec<(String, String)> = {
                let mut stmt = tx
                    .prepare(&format!("SELECT id, data_json FROM records WHERE {filter}"))
                    .map_err(storage_err)?;
                let mapped = stmt
                    .query_map(params.as_refs().as_slice(), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .map_err(storage_err)?;
                mapped.collect::<Result<_, _>>().map_err(storage_err)?
            };

            let count = rows.len();
            for (record_id, data) in rows {
                tx.execute(
                    "DELETE FROM records WHERE tbl = ?1 AND id = ?2",
                    params![table.as_str(), record_id],
                )
                .map_err(storage_err)?;
                log_change(tx, table, &record_id, "delete", None)?;
                events.push(LiveEvent::new(ChangeAction::Delete, table, parse_doc(&data)?));
            }
            Ok(count)
        })?;

        tracing::debug!(table = %table, count, "records deleted");
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// SQL helpers
// ---------------------------------------------------------------------------

fn storage_err(e: rusqlite::Error) -> BzError {
    BzError::Storage(e.to_string())
}

/// `fold_case(text)`: Unicode lowercasing. The built-in `lower()` only folds
/// ASCII, which would disagree with in-memory `Condition::matches`.
fn register_functions(conn: &Connection) -> BzResult<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|text| text.to_lowercase()))
        },
    )
    .map_err(|e| BzError::Storage(format!("failed to register sql functions: {e}")))
}

fn begin(conn: &Connection) -> BzResult<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(storage_err)
}

fn parse_doc(raw: &str) -> BzResult<Document> {
    serde_json::from_str(raw).map_err(|e| BzError::Storage(format!("corrupt document: {e}")))
}

fn read_doc(conn: &Connection, id: &RecordId) -> BzResult<Option<Document>> {
    conn.query_row(
        "SELECT data_json FROM records WHERE tbl = ?1 AND id = ?2",
        params![id.table().as_str(), id.to_string()],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(storage_err)?
    .map(|raw| parse_doc(&raw))
    .transpose()
}

fn write_doc(conn: &Connection, id: &RecordId, doc: &Document) -> BzResult<()> {
    let updated_at = doc
        .get("updated_at")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(now_timestamp);
    conn.execute(
        "UPDATE records SET data_json = ?1, updated_at = ?2 WHERE tbl = ?3 AND id = ?4",
        params![
            serde_json::to_string(doc)?,
            updated_at,
            id.table().as_str(),
            id.to_string()
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn log_change(
    conn: &Connection,
    table: Table,
    record_id: &str,
    op: &str,
    diff: Option<&Value>,
) -> BzResult<()> {
    let diff = diff.map(Value::to_string);
    conn.execute(
        "INSERT INTO changelog (tbl, record_id, operation, diff_json, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![table.as_str(), record_id, op, diff, now_timestamp()],
    )
    .map_err(storage_err)?;
    Ok(())
}

/// JSON path for a top-level document field. Field names are restricted to
/// identifier characters; the path itself is always bound, never inlined.
fn json_path(field: &str) -> BzResult<String> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !valid {
        return Err(BzError::InvalidInput(format!("invalid field name: {field}")));
    }
    Ok(format!("$.{field}"))
}

/// Positional parameters collected while a statement is assembled.
#[derive(Default)]
struct SqlParams {
    values: Vec<Box<dyn ToSql>>,
}

impl SqlParams {
    fn push(&mut self, value: impl ToSql + 'static) -> String {
        self.values.push(Box::new(value));
        format!("?{}", self.values.len())
    }

    fn push_json(&mut self, value: &Value) -> String {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => self.push(i),
                None => self.push(n.as_f64().unwrap_or(0.0)),
            },
            Value::Bool(b) => self.push(i64::from(*b)),
            Value::String(s) => self.push(s.clone()),
            other => self.push(other.to_string()),
        }
    }

    fn as_refs(&self) -> Vec<&dyn ToSql> {
        self.values.iter().map(|v| v.as_ref()).collect()
    }
}

fn where_clause(table: Table, conditions: &[Condition], params: &mut SqlParams) -> BzResult<String> {
    let mut sql = format!("tbl = {}", params.push(table.as_str()));
    for condition in conditions {
        sql.push_str(" AND ");
        sql.push_str(&condition_sql(condition, params)?);
    }
    Ok(sql)
}

fn condition_sql(condition: &Condition, params: &mut SqlParams) -> BzResult<String> {
    Ok(match condition {
        Condition::Equals { column, value } if column == "id" => {
            format!("id = {}", params.push_json(value))
        }
        Condition::Equals {
            column,
            value: Value::Null,
        } => format!(
            "json_extract(data_json, {}) IS NULL",
            params.push(json_path(column)?)
        ),
        Condition::Equals { column, value } => {
            let path = params.push(json_path(column)?);
            format!("json_extract(data_json, {path}) = {}", params.push_json(value))
        }
        Condition::Contains { column, needle } => {
            let path = params.push(json_path(column)?);
            format!(
                "instr(fold_case(CAST(json_extract(data_json, {path}) AS TEXT)), {}) > 0",
                params.push(needle.to_lowercase())
            )
        }
        Condition::Includes { column, value } => {
            let path = params.push(json_path(column)?);
            format!(
                "EXISTS (SELECT 1 FROM json_each(records.data_json, {path}) WHERE json_each.value = {})",
                params.push_json(value)
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn key(table: Table, raw: &str) -> RecordId {
        RecordId::parse_key(table, raw).unwrap()
    }

    async fn seed_products(store: &SqliteRecordStore) {
        for (k, name, price, categories) in [
            ("p1", "Desk Lamp", 30, vec!["ShopCategory:home"]),
            ("p2", "Floor Lamp", 80, vec!["ShopCategory:home", "ShopCategory:sale"]),
            ("p3", "Notebook", 5, vec!["ShopCategory:office"]),
        ] {
            store
                .create(
                    &key(Table::ShopProduct, k),
                    doc(json!({"name": name, "price": price, "category_id": categories})),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_stamps_identity_and_timestamps() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let id = RecordId::generate(Table::BlogTag);
        let created = store
            .create(&id, doc(json!({"name": "rust", "id": "spoofed"})))
            .await
            .unwrap();

        assert_eq!(created["id"], json!(id.to_string()));
        assert!(created["created_at"].is_string());
        assert_eq!(created["created_at"], created["updated_at"]);
        assert_eq!(store.select(&id).await.unwrap(), Some(created));
        assert!(store.exists(&id).await.unwrap());
        assert!(!store.exists(&RecordId::generate(Table::BlogTag)).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let id = key(Table::User, "u1");
        store.create(&id, Document::new()).await.unwrap();
        let err = store.create(&id, Document::new()).await.unwrap_err();
        assert!(matches!(err, BzError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn patch_applies_ops_and_reports_missing_records() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let id = key(Table::BlogPost, "a");
        store
            .create(&id, doc(json!({"title": "Old", "slug": "old"})))
            .await
            .unwrap();

        let ops = prepare_updates(vec![("/title", Some(json!("New"))), ("/slug", None)]);
        let patched = store.patch(&id, &ops).await.unwrap();
        assert_eq!(patched["title"], "New");
        assert_eq!(patched["slug"], "old");

        let missing = key(Table::BlogPost, "zz");
        let err = store.patch(&missing, &ops).await.unwrap_err();
        assert!(matches!(err, BzError::NotFound(ref id) if *id == missing));
    }

    #[tokio::test]
    async fn list_filters_orders_and_pages() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        seed_products(&store).await;

        let lamps = store
            .list(
                &ListQuery::new(Table::ShopProduct)
                    .filter(Condition::Contains {
                        column: "name".into(),
                        needle: "LAMP".into(),
                    })
                    .order_by("price", SortDirection::Asc),
            )
            .await
            .unwrap();
        let names: Vec<&str> = lamps.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Desk Lamp", "Floor Lamp"]);

        let on_sale = store
            .list(&ListQuery::new(Table::ShopProduct).filter(Condition::Includes {
                column: "category_id".into(),
                value: json!("ShopCategory:sale"),
            }))
            .await
            .unwrap();
        assert_eq!(on_sale.len(), 1);
        assert_eq!(on_sale[0]["name"], "Floor Lamp");

        let cheap = store
            .list(&ListQuery::new(Table::ShopProduct).filter(Condition::equals("price", 5.0)))
            .await
            .unwrap();
        assert_eq!(cheap[0]["name"], "Notebook");

        let mut page = ListQuery::new(Table::ShopProduct)
            .order_by("price", SortDirection::Desc)
            .limit(1);
        page.start = 1;
        let second = store.list(&page).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["name"], "Desk Lamp");
    }

    #[tokio::test]
    async fn hostile_filter_values_are_bound_as_data() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        seed_products(&store).await;

        let found = store
            .list(&ListQuery::new(Table::ShopProduct).filter(Condition::Contains {
                column: "name".into(),
                needle: "' OR 1=1 --".into(),
            }))
            .await
            .unwrap();
        assert!(found.is_empty());

        let err = store
            .list(&ListQuery::new(Table::ShopProduct).order_by("name) --", SortDirection::Asc))
            .await
            .unwrap_err();
        assert!(matches!(err, BzError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn array_edits_append_and_remove() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let post = key(Table::BlogPost, "a");
        store.create(&post, Document::new()).await.unwrap();

        store
            .array_append(&post, "likes", json!("BlogLike:l1"))
            .await
            .unwrap();
        store
            .array_append(&post, "likes", json!("BlogLike:l2"))
            .await
            .unwrap();
        let after = store
            .array_remove(&post, "likes", &ArrayMatch::Value(json!("BlogLike:l1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after["likes"], json!(["BlogLike:l2"]));

        let cart = key(Table::ShopCart, "c");
        store
            .create(
                &cart,
                doc(json!({"items": [
                    {"product_id": "ShopProduct:p1", "quantity": 1},
                    {"product_id": "ShopProduct:p2", "quantity": 2},
                ]})),
            )
            .await
            .unwrap();
        let cart_doc = store
            .array_remove(
                &cart,
                "items",
                &ArrayMatch::Field {
                    name: "product_id".into(),
                    value: json!("ShopProduct:p1"),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cart_doc["items"].as_array().unwrap().len(), 1);

        assert!(store
            .array_append(&key(Table::BlogPost, "missing"), "likes", json!("x"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn aggregates_and_bulk_delete() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        seed_products(&store).await;

        assert_eq!(store.count(Table::ShopProduct, &[]).await.unwrap(), 3);
        assert_eq!(store.sum(Table::ShopProduct, "price", &[]).await.unwrap(), 115.0);

        let home = [Condition::Includes {
            column: "category_id".into(),
            value: json!("ShopCategory:home"),
        }];
        assert_eq!(store.delete_where(Table::ShopProduct, &home).await.unwrap(), 2);
        assert_eq!(store.count(Table::ShopProduct, &[]).await.unwrap(), 1);
        assert_eq!(
            store.table_counts().unwrap(),
            vec![("ShopProduct".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn writes_publish_change_events_in_order() {
        let (tx, mut rx) = broadcast::channel(16);
        let store = SqliteRecordStore::open_in_memory()
            .unwrap()
            .with_change_feed(tx);
        let id = key(Table::Message, "m1");

        store.create(&id, doc(json!({"content": "hi"}))).await.unwrap();
        store
            .patch(&id, &[PatchOp::replace("/content", "hello")])
            .await
            .unwrap();
        store.delete(&id).await.unwrap();
        assert!(store.delete(&id).await.unwrap().is_none());

        let actions: Vec<ChangeAction> = (0..3).map(|_| rx.try_recv().unwrap().action).collect();
        assert_eq!(
            actions,
            vec![ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete]
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(store.changelog_len().unwrap(), 3);
    }

    #[tokio::test]
    async fn contains_folds_non_ascii_case_like_in_memory_matching() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let id = key(Table::ShopProduct, "apfel");
        let fields = doc(json!({"name": "ÄPFEL aus Österreich"}));
        store.create(&id, fields.clone()).await.unwrap();

        let condition = Condition::Contains {
            column: "name".into(),
            needle: "äpfel".into(),
        };
        assert!(condition.matches(&fields));
        let found = store
            .list(&ListQuery::new(Table::ShopProduct).filter(condition))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_all_commit() {
        let store = std::sync::Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let mut handles = Vec::new();
        for n in 0..200 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create(&RecordId::generate(Table::Message), doc(json!({ "n": n })))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.count(Table::Message, &[]).await.unwrap(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_edits_publish_in_commit_order() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = broadcast::channel(256);
        let store = std::sync::Arc::new(
            SqliteRecordStore::open(&dir.path().join(DATABASE_FILE_NAME))
                .unwrap()
                .with_change_feed(tx),
        );
        let post = key(Table::BlogPost, "busy");
        store.create(&post, Document::new()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().action, ChangeAction::Create);

        let mut handles = Vec::new();
        for n in 0..50 {
            let store = std::sync::Arc::clone(&store);
            let post = post.clone();
            handles.push(tokio::spawn(async move {
                store
                    .array_append(&post, "likes", json!(format!("BlogLike:l{n}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for expected in 1..=50 {
            let event = rx.recv().await.unwrap();
            let likes = event.document().unwrap()["likes"].as_array().unwrap().len();
            assert_eq!(likes, expected);
        }
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_FILE_NAME);
        let id = key(Table::BlogCategory, "news");
        {
            let store = SqliteRecordStore::open(&path).unwrap();
            store
                .create(&id, doc(json!({"title": "News"})))
                .await
                .unwrap();
        }
        let store = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(store.select(&id).await.unwrap().unwrap()["title"], "News");
    }
}
