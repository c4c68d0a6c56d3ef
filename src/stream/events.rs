use serde::{Deserialize, Serialize};

/// 状态事件级别，未指定时默认 debug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

/// 事件外层分类，决定推送到客户端时的事件帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    Message,
    Completed,
    Exception,
    Close,
    Timeout,
}

impl EventKind {
    /// 终止事件：每个会话有且仅有一个，且总是缓冲区中的最后一个事件
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Completed | EventKind::Exception)
    }
}

/// 事件载荷：纯文本，或带定位信息的结构化问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Text(String),
    Problem(Problem),
}

impl StatusValue {
    pub fn text(s: impl Into<String>) -> Self {
        StatusValue::Text(s.into())
    }
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusValue::Text(s) => f.write_str(s),
            StatusValue::Problem(p) => f.write_str(&p.message),
        }
    }
}

/// 结构化构建问题：指向具体文件，可携带出错片段与行号范围
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

/// 根据文件扩展名推导代码高亮语言
pub fn highlight_language(path: &str) -> &'static str {
    if path.ends_with(".css") || path.ends_with(".scss") {
        "css"
    } else if path.ends_with(".js") {
        "javascript"
    } else {
        "html"
    }
}

/// 构建成功的产物信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    /// 构建产物可访问的地址
    pub url: String,
    /// 结果应加载到的显示目标（窗口/iframe 名）
    pub frame: String,
}

/// 构建失败时的通用终止文案，细节已在此前的进度事件中发出
pub const BUILD_FAILED_TEXT: &str = "Build failed";
pub const COMPLETED_TEXT: &str = "Completed";
pub const TIMEOUT_TEXT: &str = "Timeout";

/// 待追加的事件内容，序号由缓冲区在追加时分配
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub level: LogLevel,
    pub kind: EventKind,
    pub value: StatusValue,
    pub result: Option<BuildResult>,
}

impl EventPayload {
    pub fn message(level: LogLevel, value: impl Into<String>) -> Self {
        Self {
            level,
            kind: EventKind::Message,
            value: StatusValue::Text(value.into()),
            result: None,
        }
    }

    pub fn problem(level: LogLevel, problem: Problem) -> Self {
        Self {
            level,
            kind: EventKind::Message,
            value: StatusValue::Problem(problem),
            result: None,
        }
    }

    pub fn completed(result: BuildResult) -> Self {
        Self {
            level: LogLevel::Info,
            kind: EventKind::Completed,
            value: StatusValue::text(COMPLETED_TEXT),
            result: Some(result),
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            kind: EventKind::Exception,
            value: StatusValue::Text(message.into()),
            result: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            level: LogLevel::Warn,
            kind: EventKind::Timeout,
            value: StatusValue::text(TIMEOUT_TEXT),
            result: None,
        }
    }
}

/// 已入缓冲区的状态事件，序号严格递增且不复用
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub sequence: u64,
    pub level: LogLevel,
    pub kind: EventKind,
    pub value: StatusValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
}

impl StatusEvent {
    pub fn from_payload(sequence: u64, payload: EventPayload) -> Self {
        Self {
            sequence,
            level: payload.level,
            kind: payload.kind,
            value: payload.value,
            result: payload.result,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
