use anyhow::Result;
use sqlx::SqlitePool;

/// 构建历史插入参数
pub struct BuildHistoryParams<'a> {
    pub id: &'a str,
    pub site_key: &'a str,
    pub branch: &'a str,
    pub status: &'a str,
    pub duration_ms: Option<i64>,
    pub error: Option<&'a str>,
    pub started_at: &'a str,
    pub finished_at: &'a str,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub branch: String,
    pub status: String,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Clone)]
pub struct HistoryRepository {
    db: SqlitePool,
}

impl HistoryRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, p: &BuildHistoryParams<'_>) -> Result<()> {
        sqlx::query(
            "INSERT INTO build_history (id, site_key, branch, status, duration_ms, error, started_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(p.id)
        .bind(p.site_key)
        .bind(p.branch)
        .bind(p.status)
        .bind(p.duration_ms)
        .bind(p.error)
        .bind(p.started_at)
        .bind(p.finished_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 某站点最近的构建记录，新的在前
    pub async fn recent_for_site(&self, site_key: &str, limit: i32) -> Vec<HistoryRow> {
        sqlx::query_as::<_, HistoryRow>(
            "SELECT branch, status, duration_ms, error, started_at, finished_at \
             FROM build_history WHERE site_key = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(site_key)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .unwrap_or_default()
    }
}
