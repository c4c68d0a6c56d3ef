use std::time::Duration;

use crate::state::AppState;

/// 启动后台定时任务：清理结束已超过保留期的构建会话。
/// 保留期内断线的消费者仍可带游标重连重放；过期后重连只会收到 close。
pub fn spawn_session_cleanup(state: AppState) {
    let retention = Duration::from_secs(state.config.stream.session_retention_secs);
    let tick = retention.max(Duration::from_secs(30));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            let removed = state.sessions.sweep_settled(retention);
            if removed > 0 {
                tracing::info!("已清理 {} 个结束的构建会话", removed);
            }
        }
    });
}
