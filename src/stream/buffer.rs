use std::sync::RwLock;

use tokio::sync::watch;

use crate::stream::events::{EventPayload, StatusEvent};

/// 只追加的事件缓冲区。
///
/// 序号从 1 开始严格递增，在追加时分配且永不复用；会话存活期间不淘汰
/// 任何事件，迟到的消费者总能从任意游标完整重放。写入方唯一（构建任务
/// 串行产出事件），读取方任意多（每次 poll 取一份快照），互不阻塞。
pub struct EventBuffer {
    events: RwLock<Vec<StatusEvent>>,
    /// 最新序号广播；只传序号不传事件，慢消费者不会因此丢数据
    latest: watch::Sender<u64>,
}

impl EventBuffer {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            events: RwLock::new(Vec::new()),
            latest,
        }
    }

    /// 追加一个事件，返回分配的序号
    pub fn append(&self, payload: EventPayload) -> u64 {
        let sequence = {
            let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
            let sequence = events.len() as u64 + 1;
            events.push(StatusEvent::from_payload(sequence, payload));
            sequence
        };
        // 锁已释放再通知，等待方醒来时一定能读到新事件
        let _ = self.latest.send_replace(sequence);
        sequence
    }

    /// 返回序号大于 cursor 的全部事件（升序）及新游标。
    /// 无新事件时立即返回空集与原游标，从不等待。
    pub fn since(&self, cursor: u64) -> (Vec<StatusEvent>, u64) {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let start = (cursor as usize).min(events.len());
        let batch: Vec<StatusEvent> = events[start..].to_vec();
        let next = batch.last().map_or(cursor, |e| e.sequence);
        (batch, next)
    }

    /// 当前最大序号，缓冲区为空时为 0
    pub fn last_sequence(&self) -> u64 {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len() as u64
    }

    /// 订阅序号变化，供等待新事件的一方使用
    pub fn watch_sequence(&self) -> watch::Receiver<u64> {
        self.latest.subscribe()
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::{EventKind, LogLevel};

    fn msg(text: &str) -> EventPayload {
        EventPayload::message(LogLevel::Info, text)
    }

    #[test]
    fn sequences_are_contiguous_from_one() {
        let buffer = EventBuffer::new();
        assert_eq!(buffer.append(msg("a")), 1);
        assert_eq!(buffer.append(msg("b")), 2);
        assert_eq!(buffer.append(msg("c")), 3);

        let (events, cursor) = buffer.since(0);
        assert_eq!(cursor, 3);
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn since_returns_only_the_unseen_suffix() {
        let buffer = EventBuffer::new();
        buffer.append(msg("a"));
        buffer.append(msg("b"));
        buffer.append(msg("c"));

        let (events, cursor) = buffer.since(1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 2);
        assert_eq!(cursor, 3);

        let (events, cursor) = buffer.since(3);
        assert!(events.is_empty());
        assert_eq!(cursor, 3);
    }

    #[test]
    fn replay_with_same_cursor_is_idempotent() {
        let buffer = EventBuffer::new();
        buffer.append(msg("a"));
        buffer.append(msg("b"));

        let (first, c1) = buffer.since(0);
        let (second, c2) = buffer.since(0);
        assert_eq!(c1, c2);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.sequence, b.sequence);
            assert_eq!(a.value, b.value);
        }
    }

    #[test]
    fn stale_cursor_beyond_end_yields_nothing() {
        let buffer = EventBuffer::new();
        buffer.append(msg("a"));
        let (events, cursor) = buffer.since(99);
        assert!(events.is_empty());
        assert_eq!(cursor, 99);
    }

    #[test]
    fn empty_buffer_polls_immediately() {
        let buffer = EventBuffer::new();
        let (events, cursor) = buffer.since(0);
        assert!(events.is_empty());
        assert_eq!(cursor, 0);
        assert_eq!(buffer.last_sequence(), 0);
    }

    #[tokio::test]
    async fn concurrent_appends_never_leave_gaps() {
        use std::sync::Arc;

        let buffer = Arc::new(EventBuffer::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let buffer = Arc::clone(&buffer);
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    buffer.append(EventPayload::message(
                        LogLevel::Debug,
                        format!("w{i}-{j}"),
                    ));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (events, cursor) = buffer.since(0);
        assert_eq!(cursor, 400);
        for (index, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, index as u64 + 1);
            assert_eq!(event.kind, EventKind::Message);
        }
    }

    #[tokio::test]
    async fn watch_wakes_after_append() {
        let buffer = EventBuffer::new();
        let mut rx = buffer.watch_sequence();
        assert_eq!(*rx.borrow(), 0);

        buffer.append(msg("a"));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
