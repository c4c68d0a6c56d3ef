use std::sync::Arc;
use std::time::Duration;

use crate::builder::{ProgressSink, SiteBuilder, SourceSpec};
use crate::stream::events::{BUILD_FAILED_TEXT, EventPayload};
use crate::stream::session::{BuildOutcome, BuildSession, SessionMap};
use crate::stream::supervisor;

/// 构建编排器：每个流会话恰好启动一次构建任务，把任务的进度回调
/// 转成缓冲区事件，并在任务出结局时写入唯一的终止事件。
pub struct BuildOrchestrator {
    builder: Arc<dyn SiteBuilder>,
    sessions: Arc<SessionMap>,
    /// 空闲提醒时限；None 表示不启用监视
    idle_timeout: Option<Duration>,
}

impl BuildOrchestrator {
    pub fn new(
        builder: Arc<dyn SiteBuilder>,
        sessions: Arc<SessionMap>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            builder,
            sessions,
            idle_timeout,
        }
    }

    pub fn sessions(&self) -> &SessionMap {
        &self.sessions
    }

    /// 创建会话并启动构建。
    ///
    /// 校验失败时构建任务尚不可达：同步写入终止 exception 事件后直接
    /// 返回，不会产生任何任务。失败的构建不自动重试。
    pub fn start(&self, source: SourceSpec) -> Arc<BuildSession> {
        let session = BuildSession::new(&source.site_key, &source.branch);
        self.sessions.insert(Arc::clone(&session));
        tracing::info!(
            session = %session.id,
            site = %source.site_key,
            branch = %source.branch,
            "启动构建会话"
        );

        if let Err(e) = source.validate() {
            tracing::warn!(session = %session.id, "构建初始化失败：{e}");
            session.settle(
                BuildOutcome::Failed(e.to_string()),
                EventPayload::exception(format!("Initialization failed: {e}")),
            );
            return session;
        }

        if let Some(idle) = self.idle_timeout {
            supervisor::spawn_idle_watch(Arc::clone(&session), idle);
        }

        let builder = Arc::clone(&self.builder);
        let task_session = Arc::clone(&session);
        tokio::spawn(async move {
            let progress = ProgressSink::new(Arc::clone(&task_session));
            match builder.run(source, progress).await {
                Ok(result) => {
                    tracing::info!(
                        session = %task_session.id,
                        url = %result.url,
                        "构建完成，耗时 {}ms",
                        task_session.duration_ms()
                    );
                    task_session.settle(
                        BuildOutcome::Succeeded(result.clone()),
                        EventPayload::completed(result),
                    );
                }
                Err(e) => {
                    // 错误细节此前已通过进度事件发出，终止事件保持通用文案
                    tracing::warn!(session = %task_session.id, "构建失败：{e:#}");
                    task_session.settle(
                        BuildOutcome::Failed(e.to_string()),
                        EventPayload::exception(BUILD_FAILED_TEXT),
                    );
                }
            }
        });

        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildError;
    use crate::stream::events::{BuildResult, EventKind, LogLevel, StatusValue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按脚本产出进度与结局的可编程构建器
    struct ScriptedBuilder {
        script: Vec<(LogLevel, &'static str)>,
        outcome: Result<BuildResult, String>,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SiteBuilder for ScriptedBuilder {
        async fn run(
            &self,
            _source: SourceSpec,
            progress: ProgressSink,
        ) -> Result<BuildResult, BuildError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            for (level, text) in &self.script {
                progress.emit(*level, *text);
            }
            match &self.outcome {
                Ok(result) => Ok(result.clone()),
                Err(status) => Err(BuildError::CommandFailed {
                    command: "scripted".to_string(),
                    status: status.clone(),
                }),
            }
        }
    }

    fn orchestrator(
        script: Vec<(LogLevel, &'static str)>,
        outcome: Result<BuildResult, String>,
    ) -> (BuildOrchestrator, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let builder = ScriptedBuilder {
            script,
            outcome,
            runs: Arc::clone(&runs),
        };
        let orchestrator = BuildOrchestrator::new(
            Arc::new(builder),
            Arc::new(SessionMap::new()),
            None,
        );
        (orchestrator, runs)
    }

    fn source() -> SourceSpec {
        SourceSpec {
            url: "https://example.com/repo.git".to_string(),
            branch: "main".to_string(),
            site_key: "k1".to_string(),
        }
    }

    fn preview_result() -> BuildResult {
        BuildResult {
            url: "https://x/out".to_string(),
            frame: "preview".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_build_streams_progress_then_completed() {
        let (orchestrator, runs) = orchestrator(
            vec![(LogLevel::Info, "Cloning"), (LogLevel::Warn, "Large file")],
            Ok(preview_result()),
        );
        let session = orchestrator.start(source());
        session.wait_settled().await;

        // 从 0 拉取：三个事件，终止于携带 URL 的 completed
        let result = session.poll(0);
        assert!(result.is_final);
        assert_eq!(result.events.len(), 3);
        assert_eq!(result.events[0].value, StatusValue::text("Cloning"));
        assert_eq!(result.events[1].level, LogLevel::Warn);
        let last = result.events.last().unwrap();
        assert_eq!(last.kind, EventKind::Completed);
        assert_eq!(last.level, LogLevel::Info);
        assert_eq!(last.result.as_ref().unwrap().url, "https://x/out");
        assert_eq!(last.result.as_ref().unwrap().frame, "preview");

        // 从 1 拉取：只有 warn 与 completed
        let result = session.poll(1);
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.events[0].level, LogLevel::Warn);
        assert!(result.is_final);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(matches!(session.outcome(), BuildOutcome::Succeeded(_)));
    }

    #[tokio::test]
    async fn failed_build_keeps_detail_in_band_and_terminal_generic() {
        let (orchestrator, _) = orchestrator(
            vec![(LogLevel::Error, "lint failed")],
            Err("exit 1".to_string()),
        );
        let session = orchestrator.start(source());
        session.wait_settled().await;

        let result = session.poll(0);
        assert!(result.is_final);
        assert_eq!(result.events.len(), 2);

        // 细节留在前一个非终止事件里
        assert_eq!(result.events[0].level, LogLevel::Error);
        assert_eq!(result.events[0].value, StatusValue::text("lint failed"));
        assert!(!result.events[0].is_terminal());

        // 终止事件是通用文案
        let last = result.events.last().unwrap();
        assert_eq!(last.kind, EventKind::Exception);
        assert_eq!(last.value, StatusValue::text(BUILD_FAILED_TEXT));

        assert!(matches!(session.outcome(), BuildOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn reconnect_with_cursor_resumes_without_duplication() {
        let (orchestrator, _) = orchestrator(
            vec![(LogLevel::Info, "step 1"), (LogLevel::Info, "step 2")],
            Ok(preview_result()),
        );
        let session = orchestrator.start(source());
        session.wait_settled().await;

        // 消费者看过 1 个事件后断开，带 cursor=1 重连
        let resumed = session.poll(1);
        assert_eq!(resumed.events.len(), 2);
        assert_eq!(resumed.events[0].sequence, 2);
        assert_eq!(resumed.events[1].sequence, 3);
        assert!(resumed.is_final);

        // 重复带同一游标重放，结果一致
        let replayed = session.poll(1);
        assert_eq!(replayed.events.len(), 2);
        assert_eq!(replayed.cursor, resumed.cursor);
    }

    #[tokio::test]
    async fn invalid_source_settles_without_running_builder() {
        let (orchestrator, runs) = orchestrator(vec![], Ok(preview_result()));
        let session = orchestrator.start(SourceSpec {
            url: "not a url".to_string(),
            branch: "main".to_string(),
            site_key: "k1".to_string(),
        });

        // 同步出结局，无需等待任何任务
        assert!(session.is_settled());
        let result = session.poll(0);
        assert!(result.is_final);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].kind, EventKind::Exception);
        match &result.events[0].value {
            StatusValue::Text(text) => assert!(text.starts_with("Initialization failed")),
            other => panic!("意外的事件载荷：{other:?}"),
        }

        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_is_registered_in_the_map() {
        let (orchestrator, _) = orchestrator(vec![], Ok(preview_result()));
        let session = orchestrator.start(source());
        let found = orchestrator.sessions().get("k1", "main").unwrap();
        assert_eq!(found.id, session.id);
        session.wait_settled().await;
    }
}
