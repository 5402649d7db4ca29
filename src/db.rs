use std::collections::HashMap;

use async_trait::async_trait;
use shared_types::{QueuedRequest, RequestState, SerializedBody, SerializedField};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::store::{NewQueuedRequest, QueueCounts, QueueStore, StoreError};

const BODY_EMPTY: &str = "empty";
const BODY_TEXT: &str = "text";
const BODY_MULTIPART: &str = "multipart";

#[derive(Debug, sqlx::FromRow)]
struct QueuedRequestRow {
    id: i64,
    base_url: String,
    path: String,
    method: String,
    headers: sqlx::types::Json<Vec<(String, String)>>,
    body_kind: String,
    content_type: Option<String>,
    body_text: Option<String>,
    boundary: Option<String>,
    requires_csrf: bool,
    queued_at: i64,
    attempts: i64,
    last_error: Option<String>,
    state: RequestState,
}

#[derive(Debug, sqlx::FromRow)]
struct PartRow {
    request_id: i64,
    name: String,
    value: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    data: Option<Vec<u8>>,
}

/// SQLite-backed queue. Survives restarts when pointed at a file database.
#[derive(Clone, Debug)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(url).await?;
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        tracing::debug!("closing queue store");
        self.pool.close().await;
    }

    async fn list_in_state(&self, state: RequestState) -> Result<Vec<QueuedRequest>, StoreError> {
        let mut conn = self.pool.acquire().await?;

        let rows = sqlx::query_as::<_, QueuedRequestRow>(
            "SELECT * FROM queued_requests WHERE state = ? ORDER BY queued_at ASC, id ASC;",
        )
        .bind(state)
        .fetch_all(&mut *conn)
        .await?;

        let query = r#"
        SELECT p.request_id, p.name, p.value, p.filename, p.content_type, p.data
        FROM queued_request_parts p
        JOIN queued_requests r ON r.id = p.request_id
        WHERE r.state = ?
        ORDER BY p.request_id ASC, p.position ASC;
        "#;

        let parts = sqlx::query_as::<_, PartRow>(query)
            .bind(state)
            .fetch_all(&mut *conn)
            .await?;

        let mut parts_by_request: HashMap<i64, Vec<PartRow>> = HashMap::new();
        for part in parts {
            parts_by_request
                .entry(part.request_id)
                .or_default()
                .push(part);
        }

        rows.into_iter()
            .map(|row| {
                let parts = parts_by_request.remove(&row.id).unwrap_or_default();
                into_queued_request(row, parts)
            })
            .collect()
    }
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    tracing::trace!("creating schema");
    sqlx::migrate!().run(pool).await?;

    Ok(())
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, req: NewQueuedRequest) -> Result<i64, StoreError> {
        tracing::trace!("enqueue");
        let headers_json = serde_json::to_string(&req.headers)?;

        let (body_kind, content_type, body_text, boundary, fields) = match &req.body {
            SerializedBody::Empty => (BODY_EMPTY, None, None, None, &[][..]),
            SerializedBody::Text {
                content_type,
                content,
            } => (
                BODY_TEXT,
                Some(content_type.as_str()),
                Some(content.as_str()),
                None,
                &[][..],
            ),
            SerializedBody::Multipart { boundary, fields } => (
                BODY_MULTIPART,
                None,
                None,
                Some(boundary.as_str()),
                fields.as_slice(),
            ),
        };

        let mut tx = self.pool.begin().await?;

        let query = r#"
            INSERT INTO queued_requests
            (
                base_url,
                path,
                method,
                headers,
                body_kind,
                content_type,
                body_text,
                boundary,
                requires_csrf,
                queued_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        let id = sqlx::query(query)
            .bind(&req.base_url)
            .bind(&req.path)
            .bind(&req.method)
            .bind(headers_json)
            .bind(body_kind)
            .bind(content_type)
            .bind(body_text)
            .bind(boundary)
            .bind(req.requires_csrf)
            .bind(req.queued_at)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                tracing::error!("Failed to queue request {} {}", &req.method, &req.path);
                err
            })?
            .last_insert_rowid();

        for (position, field) in fields.iter().enumerate() {
            insert_part(&mut *tx, id, position as i64, field).await?;
        }

        tx.commit().await?;

        Ok(id)
    }

    async fn list(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        tracing::trace!("list");
        self.list_in_state(RequestState::Pending).await
    }

    async fn remove(&self, id: i64) -> Result<bool, StoreError> {
        tracing::trace!("remove {}", id);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM queued_request_parts WHERE request_id = ?;")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM queued_requests WHERE id = ?;")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<QueuedRequest, StoreError> {
        tracing::trace!("mark_failed {}", id);

        let query = r#"
        UPDATE queued_requests
        SET
            attempts = attempts + 1,
            last_error = ?
        WHERE id = ?;
        "#;

        let result = sqlx::query(query)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        self.get(id).await
    }

    async fn get(&self, id: i64) -> Result<QueuedRequest, StoreError> {
        tracing::trace!("get {}", id);
        let mut conn = self.pool.acquire().await?;

        let row = sqlx::query_as::<_, QueuedRequestRow>(
            "SELECT * FROM queued_requests WHERE id = ?;",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let parts = parts_for(&mut *conn, id).await?;

        into_queued_request(row, parts)
    }

    async fn abandon(&self, id: i64) -> Result<(), StoreError> {
        tracing::trace!("abandon {}", id);
        let result = sqlx::query("UPDATE queued_requests SET state = ? WHERE id = ?;")
            .bind(RequestState::Abandoned)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn list_abandoned(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        tracing::trace!("list_abandoned");
        self.list_in_state(RequestState::Abandoned).await
    }

    async fn requeue(&self, id: i64) -> Result<(), StoreError> {
        tracing::trace!("requeue {}", id);

        let query = r#"
        UPDATE queued_requests
        SET
            state = ?,
            attempts = 0,
            last_error = NULL
        WHERE id = ? AND state = ?;
        "#;

        let result = sqlx::query(query)
            .bind(RequestState::Pending)
            .bind(id)
            .bind(RequestState::Abandoned)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn count(&self) -> Result<QueueCounts, StoreError> {
        let rows: Vec<(RequestState, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM queued_requests GROUP BY state;")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (state, count) in rows {
            let count = usize::try_from(count).unwrap_or_default();
            match state {
                RequestState::Pending => counts.pending = count,
                RequestState::Abandoned => counts.abandoned = count,
            }
        }

        Ok(counts)
    }
}

async fn insert_part(
    conn: &mut SqliteConnection,
    request_id: i64,
    position: i64,
    field: &SerializedField,
) -> Result<(), StoreError> {
    let query = r#"
        INSERT INTO queued_request_parts
        (request_id, position, name, value, filename, content_type, data)
        VALUES (?, ?, ?, ?, ?, ?, ?)
    "#;

    let q = sqlx::query(query).bind(request_id).bind(position);
    let q = match field {
        SerializedField::Text { name, value } => q
            .bind(name)
            .bind(value)
            .bind(None::<String>)
            .bind(None::<String>)
            .bind(None::<Vec<u8>>),
        SerializedField::File {
            name,
            filename,
            content_type,
            data,
        } => q
            .bind(name)
            .bind(None::<String>)
            .bind(filename)
            .bind(content_type)
            .bind(data),
    };
    q.execute(conn).await?;

    Ok(())
}

async fn parts_for(conn: &mut SqliteConnection, request_id: i64) -> Result<Vec<PartRow>, StoreError> {
    let query = r#"
    SELECT request_id, name, value, filename, content_type, data
    FROM queued_request_parts
    WHERE request_id = ?
    ORDER BY position ASC;
    "#;

    let parts = sqlx::query_as::<_, PartRow>(query)
        .bind(request_id)
        .fetch_all(conn)
        .await?;

    Ok(parts)
}

fn into_queued_request(row: QueuedRequestRow, parts: Vec<PartRow>) -> Result<QueuedRequest, StoreError> {
    let id = row.id;
    let corrupt = |reason: &str| StoreError::Corrupt {
        id,
        reason: reason.to_string(),
    };

    let body = match row.body_kind.as_str() {
        BODY_EMPTY => SerializedBody::Empty,
        BODY_TEXT => SerializedBody::Text {
            content_type: row.content_type.ok_or_else(|| corrupt("text body without content type"))?,
            content: row.body_text.ok_or_else(|| corrupt("text body without content"))?,
        },
        BODY_MULTIPART => SerializedBody::Multipart {
            boundary: row.boundary.ok_or_else(|| corrupt("multipart body without boundary"))?,
            fields: parts
                .into_iter()
                .map(|part| match (part.value, part.filename, part.content_type, part.data) {
                    (Some(value), None, None, None) => Ok(SerializedField::Text {
                        name: part.name,
                        value,
                    }),
                    (None, Some(filename), Some(content_type), Some(data)) => {
                        Ok(SerializedField::File {
                            name: part.name,
                            filename,
                            content_type,
                            data,
                        })
                    }
                    _ => Err(corrupt("multipart field is neither text nor file")),
                })
                .collect::<Result<Vec<_>, _>>()?,
        },
        other => return Err(corrupt(&format!("unknown body kind {:?}", other))),
    };

    Ok(QueuedRequest {
        id,
        base_url: row.base_url,
        path: row.path,
        method: row.method,
        headers: row.headers.0,
        body,
        requires_csrf: row.requires_csrf,
        queued_at: row.queued_at,
        attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
        last_error: row.last_error,
        state: row.state,
    })
}
