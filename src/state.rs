use anyhow::Result;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::command::CommandBuilder;
use crate::config::ServiceConfig;
use crate::repository::{HistoryRepository, MappingRepository};
use crate::stream::orchestrator::BuildOrchestrator;
use crate::stream::session::SessionMap;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<ServiceConfig>,
    pub project_root: PathBuf,
    /// 站点注册表：key <-> 源仓库 URL
    pub mappings: MappingRepository,
    /// 构建历史
    pub history: HistoryRepository,
    /// 活跃构建会话
    pub sessions: Arc<SessionMap>,
    /// 构建编排器：一个会话一个构建任务
    pub orchestrator: Arc<BuildOrchestrator>,
}

impl AppState {
    pub async fn new(project_root: PathBuf, config: ServiceConfig) -> Result<Self> {
        let db_path = project_root.join("sitecast.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePool::connect(&db_url).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("数据库迁移失败：{}", e))?;

        let sessions = Arc::new(SessionMap::new());
        let builder = Arc::new(CommandBuilder::new(project_root.clone(), &config));

        // idle_timeout_secs 为 0 表示关闭空闲监视
        let idle_timeout = (config.stream.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(config.stream.idle_timeout_secs));
        let orchestrator = Arc::new(BuildOrchestrator::new(
            builder,
            Arc::clone(&sessions),
            idle_timeout,
        ));

        Ok(Self {
            db: pool.clone(),
            config: Arc::new(config),
            project_root,
            mappings: MappingRepository::new(pool.clone()),
            history: HistoryRepository::new(pool),
            sessions,
            orchestrator,
        })
    }
}
