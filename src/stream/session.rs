use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::stream::buffer::EventBuffer;
use crate::stream::events::{BuildResult, EventPayload, StatusEvent};

/// 构建结局：由编排器独占写入，至多写一次
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Pending,
    Succeeded(BuildResult),
    Failed(String),
}

impl BuildOutcome {
    pub fn is_settled(&self) -> bool {
        !matches!(self, BuildOutcome::Pending)
    }
}

/// 一次构建会话：从任务启动到终止事件送达所有消费者为止。
///
/// 游标只对产生它的会话有效；会话内的重放是幂等的。
pub struct BuildSession {
    pub id: String,
    pub site_key: String,
    pub branch: String,
    pub buffer: EventBuffer,
    pub started_at: DateTime<Utc>,
    started: Instant,
    finished: RwLock<BuildOutcome>,
    settled_at: Mutex<Option<Instant>>,
}

/// 一次 poll 的结果：未见后缀、新游标、是否已到终止事件
pub struct PollResult {
    pub events: Vec<StatusEvent>,
    pub cursor: u64,
    pub is_final: bool,
}

impl BuildSession {
    pub fn new(site_key: impl Into<String>, branch: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ulid::Ulid::new().to_string(),
            site_key: site_key.into(),
            branch: branch.into(),
            buffer: EventBuffer::new(),
            started_at: Utc::now(),
            started: Instant::now(),
            finished: RwLock::new(BuildOutcome::Pending),
            settled_at: Mutex::new(None),
        })
    }

    /// 取序号大于 cursor 的未见后缀。游标相同则结果相同；从不阻塞。
    pub fn poll(&self, cursor: u64) -> PollResult {
        let (events, cursor) = self.buffer.since(cursor);
        let is_final = events.last().is_some_and(|e| e.is_terminal());
        PollResult {
            events,
            cursor,
            is_final,
        }
    }

    pub fn outcome(&self) -> BuildOutcome {
        self.finished
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome().is_settled()
    }

    /// 记录结局并追加终止事件。只有首次调用生效；之后的调用不产生
    /// 任何事件（每个会话有且仅有一个终止事件）。
    pub fn settle(&self, outcome: BuildOutcome, terminal: EventPayload) -> bool {
        debug_assert!(terminal.kind.is_terminal());
        debug_assert!(outcome.is_settled());
        {
            let mut finished = self.finished.write().unwrap_or_else(|e| e.into_inner());
            if finished.is_settled() {
                tracing::warn!(session = %self.id, "会话已有结局，忽略重复 settle");
                return false;
            }
            *finished = outcome;
        }
        self.buffer.append(terminal);
        *self.settled_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        true
    }

    /// 等待会话出结局。消费者断开不会取消构建，结局始终可等到。
    pub async fn wait_settled(&self) -> BuildOutcome {
        let mut rx = self.buffer.watch_sequence();
        loop {
            let outcome = self.outcome();
            if outcome.is_settled() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return self.outcome();
            }
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    /// 距离结局的时长；尚未结束时为 None
    pub fn settled_for(&self) -> Option<Duration> {
        self.settled_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| at.elapsed())
    }
}

/// 活跃会话表，按 站点 key + 分支 索引
pub struct SessionMap {
    inner: Mutex<HashMap<String, Arc<BuildSession>>>,
}

fn slot(site_key: &str, branch: &str) -> String {
    format!("{site_key}@{branch}")
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// 登记会话，同一 站点+分支 的旧会话被替换
    pub fn insert(&self, session: Arc<BuildSession>) {
        let key = slot(&session.site_key, &session.branch);
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, session);
    }

    pub fn get(&self, site_key: &str, branch: &str) -> Option<Arc<BuildSession>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&slot(site_key, branch))
            .cloned()
    }

    /// 清理结束已久的会话，返回清理数量
    pub fn sweep_settled(&self, retention: Duration) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.len();
        inner.retain(|_, session| {
            session
                .settled_for()
                .is_none_or(|elapsed| elapsed < retention)
        });
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}
