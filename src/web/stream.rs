use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;

use crate::builder::SourceSpec;
use crate::repository::history::BuildHistoryParams;
use crate::state::AppState;
use crate::stream::events::{EventKind, StatusEvent};
use crate::stream::session::{BuildOutcome, BuildSession};

#[derive(Deserialize)]
pub struct StreamParams {
    pub branch: Option<String>,
    /// 手动续传游标；浏览器自动重连走 Last-Event-ID 头
    pub cursor: Option<u64>,
}

/// 构建事件流（SSE）。
///
/// 首次连接（无 Last-Event-ID、无 cursor）为该 站点+分支 启动一次新
/// 构建；重连请求带游标，从现有会话重放严格大于游标的事件。会话已被
/// 清理时回一个 close 帧优雅收尾。
pub async fn build_stream(
    Path(key): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let branch = params.branch.unwrap_or_else(|| "main".to_string());

    let mapping = match state.mappings.resolve(&key).await {
        Ok(Some(mapping)) => mapping,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("查询站点映射失败：{e:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.config.stream.keep_alive_secs.max(1)));

    let cursor = last_event_id(&headers).or(params.cursor);
    if let Some(cursor) = cursor {
        // 断线续传：同一会话 + 上次游标，无重复无遗漏
        return match state.sessions.get(&key, &branch) {
            Some(session) => {
                tracing::debug!(session = %session.id, cursor, "消费者重连");
                Sse::new(session_stream(session, cursor))
                    .keep_alive(keep_alive)
                    .into_response()
            }
            // 会话已清理：流早已优雅结束，回 close 而不是编造事件
            None => Sse::new(closed_stream())
                .keep_alive(keep_alive)
                .into_response(),
        };
    }

    let session = state.orchestrator.start(SourceSpec {
        url: mapping.url,
        branch,
        site_key: key,
    });
    spawn_history_recorder(state, Arc::clone(&session));

    Sse::new(session_stream(session, 0))
        .keep_alive(keep_alive)
        .into_response()
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

struct SseState {
    session: Arc<BuildSession>,
    cursor: u64,
    pending: VecDeque<StatusEvent>,
    finished: bool,
    close_sent: bool,
}

/// 把会话缓冲区变成 SSE 事件流：先重放 cursor 之后的事件，再随缓冲区
/// 增长继续推送；送出终止事件后补一个 close 帧并结束。
fn session_stream(
    session: Arc<BuildSession>,
    cursor: u64,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = SseState {
        session,
        cursor,
        pending: VecDeque::new(),
        finished: false,
        close_sent: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(sse_event(&event)), st));
            }
            if st.finished {
                if st.close_sent {
                    return None;
                }
                st.close_sent = true;
                return Some((Ok(Event::default().event("close").data("")), st));
            }

            // 先订阅再快照，追加发生在两步之间也不会漏醒
            let mut rx = st.session.buffer.watch_sequence();
            let polled = st.session.poll(st.cursor);
            if polled.events.is_empty() {
                if rx.changed().await.is_err() {
                    st.finished = true;
                }
                continue;
            }
            st.cursor = polled.cursor;
            st.finished = polled.is_final;
            st.pending.extend(polled.events);
        }
    })
}

/// 会话不复存在时的单帧流：只有一个优雅 close
fn closed_stream() -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::iter(vec![Ok(Event::default().event("close").data(""))])
}

/// 事件 -> (SSE 事件名, data 文本)。message 用默认事件名（None）；
/// completed 把 url/frame 并入 JSON；exception 按协议发纯错误文本。
fn frame_parts(event: &StatusEvent) -> (Option<&'static str>, String) {
    match event.kind {
        EventKind::Message => (
            None,
            json!({ "level": event.level, "value": event.value }).to_string(),
        ),
        EventKind::Timeout => (
            Some("timeout"),
            json!({ "level": event.level, "value": event.value }).to_string(),
        ),
        EventKind::Completed => {
            let mut body = json!({ "level": event.level, "value": event.value });
            if let Some(result) = &event.result {
                body["url"] = json!(result.url);
                body["frame"] = json!(result.frame);
            }
            (Some("completed"), body.to_string())
        }
        EventKind::Exception => (Some("exception"), event.value.to_string()),
        EventKind::Close => (Some("close"), String::new()),
    }
}

fn sse_event(event: &StatusEvent) -> Event {
    let (name, data) = frame_parts(event);
    let frame = Event::default().id(event.sequence.to_string());
    let frame = match name {
        Some(name) => frame.event(name),
        None => frame,
    };
    frame.data(data)
}

/// 会话出结局后写一行构建历史
fn spawn_history_recorder(state: AppState, session: Arc<BuildSession>) {
    tokio::spawn(async move {
        let outcome = session.wait_settled().await;
        let (status, error) = match &outcome {
            BuildOutcome::Succeeded(_) => ("success", None),
            BuildOutcome::Failed(reason) => ("failed", Some(reason.clone())),
            BuildOutcome::Pending => return,
        };

        let id = ulid::Ulid::new().to_string();
        let started_at = session.started_at.to_rfc3339();
        let finished_at = Utc::now().to_rfc3339();
        let params = BuildHistoryParams {
            id: &id,
            site_key: &session.site_key,
            branch: &session.branch,
            status,
            duration_ms: Some(session.duration_ms()),
            error: error.as_deref(),
            started_at: &started_at,
            finished_at: &finished_at,
        };
        if let Err(e) = state.history.insert(&params).await {
            tracing::warn!(session = %session.id, "写入构建历史失败：{e:#}");
        }
    });
}
