//! Relational Store Gateway: documents, chunks, conflicts, and the chat
//! session/message tables, backed by SQLite via `sqlx`.

use crate::error::{Result, StoreError};
use crate::model::{
    ChatMessage, ChatRole, ChatSession, Chunk, Conflict, ConflictLabel, Document, DocumentStatus,
    JudgedBy, ResolutionAction,
};
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

/// Owns the connection pool and runs migrations on [`Store::initialize`].
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to `database_url`, creating the parent directory for
    /// file-backed SQLite databases if necessary.
    pub async fn connect(database_url: &str) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if path != ":memory:" {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(crate::error::Error::Io)?;
                    }
                }
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(crate::error::Error::Database)?;
        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                external_ref TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                extension TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                effective_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                page INTEGER,
                section_path TEXT,
                UNIQUE(document_id, idx)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                new_chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
                existing_chunk_id TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                score REAL NOT NULL,
                neighbor_sim REAL,
                judged_by TEXT NOT NULL,
                resolution_action TEXT,
                resolved_at TEXT,
                resolver_note TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;

        Ok(())
    }

    // ---- Documents ----------------------------------------------------

    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, title, external_ref, file_hash, storage_key, extension, status, created_at, effective_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(doc.id.to_string())
        .bind(&doc.title)
        .bind(&doc.external_ref)
        .bind(doc.file_hash.to_string())
        .bind(&doc.storage_key)
        .bind(&doc.extension)
        .bind(doc.status.as_str())
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.effective_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    pub async fn find_document_by_ref_and_hash(
        &self,
        external_ref: &str,
        file_hash: u64,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE external_ref = ? AND file_hash = ? LIMIT 1",
        )
        .bind(external_ref)
        .bind(file_hash.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(row.map(|r| document_from_row(&r)))
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(row.map(|r| document_from_row(&r)))
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    pub async fn set_document_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        effective_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?, effective_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(effective_at.map(|t| t.to_rfc3339()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    pub async fn delete_document(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // ---- Chunks ---------------------------------------------------------

    pub async fn chunk_count(&self, document_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as c FROM chunks WHERE document_id = ?")
            .bind(document_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(row.get::<i64, _>("c"))
    }

    /// Bulk-insert all chunks for a document inside a single transaction.
    pub async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(crate::error::Error::Database)?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, idx, text, hash, page, section_path)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.id.to_string())
            .bind(chunk.document_id.to_string())
            .bind(chunk.idx)
            .bind(&chunk.text)
            .bind(chunk.hash.to_string())
            .bind(chunk.page)
            .bind(&chunk.section_path)
            .execute(&mut *tx)
            .await
            .map_err(|e| crate::error::Error::Store(StoreError::TransactionFailed(e.to_string())))?;
        }
        tx.commit()
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    pub async fn get_chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY idx ASC")
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    pub async fn get_chunk(&self, id: Uuid) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(row.map(|r| chunk_from_row(&r)))
    }

    pub async fn delete_chunk(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    // ---- Conflicts --------------------------------------------------------

    /// Whether an *open* conflict already exists for this exact
    /// (new, existing) pair.
    pub async fn open_conflict_exists(
        &self,
        new_chunk_id: Uuid,
        existing_chunk_id: Uuid,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM conflicts
             WHERE new_chunk_id = ? AND existing_chunk_id = ? AND resolved_at IS NULL",
        )
        .bind(new_chunk_id.to_string())
        .bind(existing_chunk_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(row.get::<i64, _>("c") > 0)
    }

    /// Persist all records for one document's analyze stage in a single
    /// transaction. Records whose pair already has an open conflict are
    /// skipped.
    pub async fn insert_conflicts(&self, conflicts: &[Conflict]) -> Result<Vec<Conflict>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(crate::error::Error::Database)?;
        let mut inserted = Vec::new();
        for c in conflicts {
            let exists: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM conflicts WHERE new_chunk_id = ? AND existing_chunk_id = ? AND resolved_at IS NULL",
            )
            .bind(c.new_chunk_id.to_string())
            .bind(c.existing_chunk_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| crate::error::Error::Store(StoreError::TransactionFailed(e.to_string())))?;
            if exists > 0 {
                continue;
            }
            sqlx::query(
                "INSERT INTO conflicts (id, new_chunk_id, existing_chunk_id, label, score, neighbor_sim, judged_by, resolution_action, resolved_at, resolver_note)
                 VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL)",
            )
            .bind(c.id.to_string())
            .bind(c.new_chunk_id.to_string())
            .bind(c.existing_chunk_id.to_string())
            .bind(c.label.as_str())
            .bind(c.score)
            .bind(c.neighbor_sim)
            .bind(c.judged_by.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| crate::error::Error::Store(StoreError::TransactionFailed(e.to_string())))?;
            inserted.push(c.clone());
        }
        tx.commit()
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(inserted)
    }

    pub async fn list_open_conflicts(&self) -> Result<Vec<Conflict>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE resolved_at IS NULL ORDER BY rowid ASC LIMIT 200",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(rows.iter().map(conflict_from_row).collect())
    }

    pub async fn get_conflict(&self, id: Uuid) -> Result<Option<Conflict>> {
        let row = sqlx::query("SELECT * FROM conflicts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(row.map(|r| conflict_from_row(&r)))
    }

    pub async fn resolve_conflict(
        &self,
        id: Uuid,
        action: ResolutionAction,
        note: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conflicts SET resolution_action = ?, resolved_at = ?, resolver_note = ? WHERE id = ?",
        )
        .bind(action.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(note)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    /// Whether any open conflict references any chunk owned by `document_id`,
    /// on either side of the pair (§4.5 step 7).
    pub async fn has_open_conflicts_for_document(&self, document_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM conflicts c
             JOIN chunks n ON c.new_chunk_id = n.id
             JOIN chunks e ON c.existing_chunk_id = e.id
             WHERE c.resolved_at IS NULL AND (n.document_id = ? OR e.document_id = ?)",
        )
        .bind(document_id.to_string())
        .bind(document_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(row.get::<i64, _>("c") > 0)
    }

    /// Count of open conflicts referencing any chunk owned by `document_id`.
    pub async fn open_conflict_count_for_document(&self, document_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM conflicts c
             JOIN chunks n ON c.new_chunk_id = n.id
             JOIN chunks e ON c.existing_chunk_id = e.id
             WHERE c.resolved_at IS NULL AND (n.document_id = ? OR e.document_id = ?)",
        )
        .bind(document_id.to_string())
        .bind(document_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(row.get::<i64, _>("c"))
    }

    /// Count of open duplicate-labeled conflicts referencing any chunk owned
    /// by `document_id` — the dedup groups still awaiting resolution.
    pub async fn open_dedup_conflict_count_for_document(&self, document_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM conflicts c
             JOIN chunks n ON c.new_chunk_id = n.id
             JOIN chunks e ON c.existing_chunk_id = e.id
             WHERE c.resolved_at IS NULL AND c.label = ? AND (n.document_id = ? OR e.document_id = ?)",
        )
        .bind(ConflictLabel::Duplicate.as_str())
        .bind(document_id.to_string())
        .bind(document_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(row.get::<i64, _>("c"))
    }

    // ---- Chat sessions / messages (ambient) --------------------------------

    pub async fn insert_chat_session(&self, session: &ChatSession) -> Result<()> {
        sqlx::query("INSERT INTO chat_sessions (id, title, created_at) VALUES (?, ?, ?)")
            .bind(session.id.to_string())
            .bind(&session.title)
            .bind(session.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    pub async fn insert_chat_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.session_id.to_string())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(())
    }

    pub async fn list_chat_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::Error::Database)?;
        Ok(rows
            .iter()
            .map(|r| ChatMessage {
                id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
                session_id: Uuid::parse_str(&r.get::<String, _>("session_id")).unwrap_or_default(),
                role: ChatRole::parse(&r.get::<String, _>("role")).unwrap_or(ChatRole::User),
                content: r.get("content"),
                created_at: r
                    .get::<String, _>("created_at")
                    .parse::<chrono::DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }
}

fn document_from_row(r: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        title: r.get("title"),
        external_ref: r.get("external_ref"),
        file_hash: r
            .get::<String, _>("file_hash")
            .parse::<u64>()
            .unwrap_or(0),
        storage_key: r.get("storage_key"),
        extension: r.get("extension"),
        status: DocumentStatus::parse(&r.get::<String, _>("status")).unwrap_or(DocumentStatus::Draft),
        created_at: r
            .get::<String, _>("created_at")
            .parse::<chrono::DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        effective_at: r
            .get::<Option<String>, _>("effective_at")
            .and_then(|s| s.parse::<chrono::DateTime<Utc>>().ok()),
    }
}

fn chunk_from_row(r: &sqlx::sqlite::SqliteRow) -> Chunk {
    Chunk {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        document_id: Uuid::parse_str(&r.get::<String, _>("document_id")).unwrap_or_default(),
        idx: r.get("idx"),
        text: r.get("text"),
        hash: r.get::<String, _>("hash").parse::<u64>().unwrap_or(0),
        page: r.get("page"),
        section_path: r.get("section_path"),
    }
}

fn conflict_from_row(r: &sqlx::sqlite::SqliteRow) -> Conflict {
    Conflict {
        id: Uuid::parse_str(&r.get::<String, _>("id")).unwrap_or_default(),
        new_chunk_id: Uuid::parse_str(&r.get::<String, _>("new_chunk_id")).unwrap_or_default(),
        existing_chunk_id: Uuid::parse_str(&r.get::<String, _>("existing_chunk_id"))
            .unwrap_or_default(),
        label: ConflictLabel::parse(&r.get::<String, _>("label")).unwrap_or(ConflictLabel::Duplicate),
        score: r.get("score"),
        neighbor_sim: r.get("neighbor_sim"),
        judged_by: JudgedBy::parse(&r.get::<String, _>("judged_by")).unwrap_or(JudgedBy::Nli),
        resolution_action: r
            .get::<Option<String>, _>("resolution_action")
            .and_then(|s| ResolutionAction::parse(&s)),
        resolved_at: r
            .get::<Option<String>, _>("resolved_at")
            .and_then(|s| s.parse::<chrono::DateTime<Utc>>().ok()),
        resolver_note: r.get("resolver_note"),
    }
}
