use std::sync::Arc;
use std::time::Duration;

use crate::stream::events::{EventKind, EventPayload};
use crate::stream::session::BuildSession;

/// 会话空闲监视：构建超过 idle 时限没有任何输出时，追加一个非终止的
/// timeout 事件提醒消费者。纯观测性质，绝不取消底层构建任务。
///
/// 每段静默期最多提醒一次；构建方恢复输出后重新武装。监视到会话出
/// 结局即退出。
pub fn spawn_idle_watch(session: Arc<BuildSession>, idle: Duration) {
    tokio::spawn(async move {
        let mut rx = session.buffer.watch_sequence();
        let mut cursor = session.buffer.last_sequence();
        let mut fired = false;

        loop {
            if session.is_settled() {
                break;
            }
            match tokio::time::timeout(idle, rx.changed()).await {
                // 有新事件：只有构建方自己的输出才算恢复活跃，
                // 我们追加的 timeout 事件不算
                Ok(Ok(())) => {
                    let (batch, next) = session.buffer.since(cursor);
                    cursor = next;
                    if batch.iter().any(|e| e.kind != EventKind::Timeout) {
                        fired = false;
                    }
                }
                // 缓冲区随会话销毁
                Ok(Err(_)) => break,
                Err(_) => {
                    if !fired && !session.is_settled() {
                        tracing::debug!(
                            session = %session.id,
                            "构建 {} 秒无输出，发出 timeout 提醒",
                            idle.as_secs()
                        );
                        session.buffer.append(EventPayload::timeout());
                        fired = true;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::{BuildResult, LogLevel};
    use crate::stream::session::BuildOutcome;

    #[tokio::test(start_paused = true)]
    async fn quiet_session_gets_one_timeout_event() {
        let session = BuildSession::new("k1", "main");
        spawn_idle_watch(Arc::clone(&session), Duration::from_secs(10));

        // 两个时限过去，静默期只提醒一次
        tokio::time::sleep(Duration::from_secs(25)).await;

        let (events, _) = session.buffer.since(0);
        let timeouts = events
            .iter()
            .filter(|e| e.kind == EventKind::Timeout)
            .count();
        assert_eq!(timeouts, 1);
        assert!(!events[0].is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn builder_output_rearms_the_watch() {
        let session = BuildSession::new("k1", "main");
        spawn_idle_watch(Arc::clone(&session), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(15)).await;
        session
            .buffer
            .append(EventPayload::message(LogLevel::Info, "还活着"));
        tokio::time::sleep(Duration::from_secs(15)).await;

        let (events, _) = session.buffer.since(0);
        let timeouts = events
            .iter()
            .filter(|e| e.kind == EventKind::Timeout)
            .count();
        assert_eq!(timeouts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn active_session_is_left_alone() {
        let session = BuildSession::new("k1", "main");
        spawn_idle_watch(Arc::clone(&session), Duration::from_secs(10));

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            session
                .buffer
                .append(EventPayload::message(LogLevel::Debug, "进度"));
        }

        let (events, _) = session.buffer.since(0);
        assert!(events.iter().all(|e| e.kind != EventKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_stops_after_settle() {
        let session = BuildSession::new("k1", "main");
        spawn_idle_watch(Arc::clone(&session), Duration::from_secs(10));

        session.settle(
            BuildOutcome::Succeeded(BuildResult {
                url: "https://x/out".to_string(),
                frame: "preview".to_string(),
            }),
            EventPayload::completed(BuildResult {
                url: "https://x/out".to_string(),
                frame: "preview".to_string(),
            }),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;

        // 终止事件仍是缓冲区最后一个事件
        let (events, _) = session.buffer.since(0);
        assert!(events.last().unwrap().is_terminal());
        assert!(events.iter().all(|e| e.kind != EventKind::Timeout));
    }
}
