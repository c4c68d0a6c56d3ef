pub mod command;

use std::path::Path;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::stream::events::{BuildResult, EventPayload, LogLevel, Problem};
use crate::stream::session::BuildSession;

static SOURCE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?|git)://\S+$").unwrap());
static BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").unwrap());

/// 站点注册入口只接受远程仓库地址（本地目录仅限 CLI 与测试）
pub fn is_valid_source_url(url: &str) -> bool {
    SOURCE_URL_RE.is_match(url)
}

/// 一次构建的源描述
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// 仓库地址（http/https/git），或本地目录（CLI 与测试用）
    pub url: String,
    pub branch: String,
    pub site_key: String,
}

impl SourceSpec {
    /// 启动构建任务前的同步校验；失败即初始化错误
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.url.is_empty() {
            return Err(BuildError::InvalidSource("仓库地址为空".to_string()));
        }
        if !SOURCE_URL_RE.is_match(&self.url) && !Path::new(&self.url).is_dir() {
            return Err(BuildError::InvalidSource(format!(
                "无法识别的仓库地址：{}",
                self.url
            )));
        }
        if !BRANCH_RE.is_match(&self.branch) || self.branch.contains("..") {
            return Err(BuildError::InvalidSource(format!(
                "非法分支名：{}",
                self.branch
            )));
        }
        Ok(())
    }

    /// 本地目录源无需克隆
    pub fn is_local(&self) -> bool {
        !SOURCE_URL_RE.is_match(&self.url) && Path::new(&self.url).is_dir()
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("无效构建源：{0}")]
    InvalidSource(String),
    #[error("{command} 退出：{status}")]
    CommandFailed { command: String, status: String },
    #[error("构建进程 IO 错误：{0}")]
    Io(#[from] std::io::Error),
}

/// 构建任务向事件缓冲区上报进度的回调通道。
/// 只能产生普通 message 事件，终止事件由编排器负责。
#[derive(Clone)]
pub struct ProgressSink {
    session: Arc<BuildSession>,
}

impl ProgressSink {
    pub(crate) fn new(session: Arc<BuildSession>) -> Self {
        Self { session }
    }

    pub fn emit(&self, level: LogLevel, text: impl Into<String>) {
        self.session
            .buffer
            .append(EventPayload::message(level, text));
    }

    pub fn problem(&self, level: LogLevel, problem: Problem) {
        self.session
            .buffer
            .append(EventPayload::problem(level, problem));
    }
}

/// 外部构建协作方：克隆/拉取源码并运行静态站点生成。
/// 进度通过 sink 上报零次或多次，最终以 BuildResult 成功或以错误失败。
#[async_trait]
pub trait SiteBuilder: Send + Sync {
    async fn run(&self, source: SourceSpec, progress: ProgressSink)
    -> Result<BuildResult, BuildError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(url: &str, branch: &str) -> SourceSpec {
        SourceSpec {
            url: url.to_string(),
            branch: branch.to_string(),
            site_key: "k1".to_string(),
        }
    }

    #[test]
    fn accepts_http_and_git_urls() {
        assert!(spec("https://example.com/repo.git", "main").validate().is_ok());
        assert!(spec("git://example.com/repo.git", "main").validate().is_ok());
    }

    #[test]
    fn rejects_empty_and_garbage_urls() {
        assert!(matches!(
            spec("", "main").validate(),
            Err(BuildError::InvalidSource(_))
        ));
        assert!(matches!(
            spec("not a url", "main").validate(),
            Err(BuildError::InvalidSource(_))
        ));
    }

    #[test]
    fn rejects_suspicious_branch_names() {
        assert!(spec("https://example.com/r.git", "feat/x-1.2").validate().is_ok());
        assert!(spec("https://example.com/r.git", "").validate().is_err());
        assert!(spec("https://example.com/r.git", "-rf").validate().is_err());
        assert!(spec("https://example.com/r.git", "a..b").validate().is_err());
        assert!(spec("https://example.com/r.git", "a b").validate().is_err());
    }

    #[test]
    fn local_directory_counts_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let s = spec(dir.path().to_str().unwrap(), "main");
        assert!(s.validate().is_ok());
        assert!(s.is_local());
        assert!(!spec("https://example.com/r.git", "main").is_local());
    }
}
