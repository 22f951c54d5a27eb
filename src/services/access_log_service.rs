//! Append-only access audit.

use super::{ServiceError, ServiceResult};
use crate::models::{
    access_log::{AccessAction, AccessLog},
    page::{Page, PageRequest},
    user::User,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::error;
use uuid::Uuid;

const MAX_USER_AGENT_LEN: usize = 500;

/// Caller details captured from the HTTP request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default)]
pub struct AccessLogFilter {
    pub document_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub action: Option<AccessAction>,
}

#[derive(Clone)]
pub struct AccessLogService {
    db: SqlitePool,
}

impl AccessLogService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        document_id: Uuid,
        user_id: Option<Uuid>,
        action: AccessAction,
        meta: &RequestMeta,
    ) -> ServiceResult<AccessLog> {
        let user_agent: String = meta.user_agent.chars().take(MAX_USER_AGENT_LEN).collect();
        let log = sqlx::query_as::<_, AccessLog>(
            "INSERT INTO access_logs (id, document_id, user_id, action, ip_address, user_agent, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(user_id)
        .bind(action)
        .bind(&meta.ip_address)
        .bind(user_agent)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;
        Ok(log)
    }

    /// Like [`record`](Self::record) but a failed write is only logged.
    pub async fn record_best_effort(
        &self,
        document_id: Uuid,
        user_id: Option<Uuid>,
        action: AccessAction,
        meta: &RequestMeta,
    ) {
        if let Err(err) = self.record(document_id, user_id, action, meta).await {
            error!(%document_id, %action, "error logging document access: {err}");
        }
    }

    /// Newest first. Staff only.
    pub async fn list(
        &self,
        actor: &User,
        filter: &AccessLogFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<AccessLog>> {
        if !actor.is_staff {
            return Err(ServiceError::staff_only());
        }

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM access_logs WHERE 1 = 1");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM access_logs WHERE 1 = 1");
        push_filter(&mut query, filter);
        query.push(" ORDER BY timestamp DESC, id DESC LIMIT ");
        query.push_bind(page.limit());
        query.push(" OFFSET ");
        query.push_bind(page.offset());
        let rows: Vec<AccessLog> = query.build_query_as().fetch_all(&self.db).await?;

        Ok(Page::new(page, total, rows))
    }

    pub async fn get(&self, actor: &User, id: Uuid) -> ServiceResult<AccessLog> {
        if !actor.is_staff {
            return Err(ServiceError::staff_only());
        }
        sqlx::query_as::<_, AccessLog>("SELECT * FROM access_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("access log", id))
    }

    /// Every entry for one document, oldest first.
    pub async fn for_document(&self, document_id: Uuid) -> ServiceResult<Vec<AccessLog>> {
        let rows = sqlx::query_as::<_, AccessLog>(
            "SELECT * FROM access_logs WHERE document_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(document_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AccessLogFilter) {
    if let Some(document_id) = filter.document_id {
        builder.push(" AND document_id = ");
        builder.push_bind(document_id);
    }
    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ");
        builder.push_bind(user_id);
    }
    if let Some(action) = filter.action {
        builder.push(" AND action = ");
        builder.push_bind(action);
    }
}
