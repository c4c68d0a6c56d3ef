use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::builder::{BuildError, ProgressSink, SiteBuilder, SourceSpec};
use crate::config::ServiceConfig;
use crate::stream::events::{BuildResult, LogLevel, Problem};

/// 形如 path:line[:col]: message 的生成器诊断行
static DIAGNOSTIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^\s:]+\.[A-Za-z0-9]+):(?P<line>\d+)(?::(?P<col>\d+))?:?\s+(?P<message>.+)$")
        .unwrap()
});

/// 命令行构建器：git 浅克隆 + 外部静态站点生成命令。
///
/// 子进程 stdout 逐行转为 debug 进度事件；stderr 行能识别出
/// 文件定位的按结构化 Problem 上报，其余转为 warn。失败时先把退出
/// 状态以 error 事件发出（细节在带内），再返回错误。
pub struct CommandBuilder {
    root: PathBuf,
    command: String,
    clone_depth: u32,
    build_dir: String,
    sites_dir: String,
    base_url: String,
    frame: String,
}

impl CommandBuilder {
    pub fn new(root: PathBuf, config: &ServiceConfig) -> Self {
        Self {
            root,
            command: config.builder.command.clone(),
            clone_depth: config.builder.clone_depth,
            build_dir: config.builder.build_dir.clone(),
            sites_dir: config.builder.sites_dir.clone(),
            base_url: config.site.url.clone(),
            frame: config.site.frame.clone(),
        }
    }

    /// 产物对外地址：{site.url}/sites/{key}/{branch}/
    fn site_url(&self, source: &SourceSpec) -> String {
        format!(
            "{}/sites/{}/{}/",
            self.base_url.trim_end_matches('/'),
            source.site_key,
            source.branch
        )
    }

    /// 拆分生成器命令并填入输出目录。
    /// 命令中出现 {output} 则替换；没有则把输出目录追加为末参。
    fn build_command_line(&self, out_dir: &Path) -> Result<(String, Vec<String>), BuildError> {
        let mut parts = self.command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(BuildError::InvalidSource("builder.command 为空".to_string()));
        };
        let out = out_dir.to_string_lossy();
        let mut args: Vec<String> = parts.map(|s| s.to_string()).collect();
        let mut substituted = false;
        for arg in &mut args {
            if arg.contains("{output}") {
                *arg = arg.replace("{output}", &out);
                substituted = true;
            }
        }
        if !substituted {
            args.push(out.into_owned());
        }
        Ok((program.to_string(), args))
    }

    /// 运行子进程并把输出逐行转发为进度事件。
    /// stderr 行按 stderr_level 上报（git 的正常进度也走 stderr）；
    /// diagnose_in 给出源码目录时，stderr 中的诊断行升级为 Problem。
    async fn run_streaming(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        progress: &ProgressSink,
        stderr_level: LogLevel,
        diagnose_in: Option<&Path>,
    ) -> Result<std::process::ExitStatus, BuildError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let pump_stdout = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        progress.emit(LogLevel::Debug, line);
                    }
                }
            }
        };
        let pump_stderr = async {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match diagnose_in.and_then(|dir| parse_diagnostic(&line, dir)) {
                        Some(problem) => progress.problem(LogLevel::Error, problem),
                        None => progress.emit(stderr_level, line),
                    }
                }
            }
        };

        tokio::join!(pump_stdout, pump_stderr);
        Ok(child.wait().await?)
    }
}

#[async_trait::async_trait]
impl SiteBuilder for CommandBuilder {
    async fn run(
        &self,
        source: SourceSpec,
        progress: ProgressSink,
    ) -> Result<BuildResult, BuildError> {
        let out_dir = self
            .root
            .join(&self.sites_dir)
            .join(&source.site_key)
            .join(&source.branch);
        tokio::fs::create_dir_all(&out_dir).await?;

        // 本地目录源直接就地构建；远程源先浅克隆到工作目录
        let (src_dir, cloned) = if source.is_local() {
            (PathBuf::from(&source.url), None)
        } else {
            let work_dir = self
                .root
                .join(&self.build_dir)
                .join(format!("{}-{}", source.site_key, ulid::Ulid::new()));
            if let Some(parent) = work_dir.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            progress.emit(
                LogLevel::Info,
                format!("Cloning {} ({})", source.url, source.branch),
            );
            let args = vec![
                "clone".to_string(),
                "--depth".to_string(),
                self.clone_depth.to_string(),
                "--branch".to_string(),
                source.branch.clone(),
                "--single-branch".to_string(),
                source.url.clone(),
                work_dir.to_string_lossy().into_owned(),
            ];
            let status = self
                .run_streaming("git", &args, &self.root, &progress, LogLevel::Debug, None)
                .await?;
            if !status.success() {
                progress.emit(LogLevel::Error, format!("git clone: {status}"));
                let _ = tokio::fs::remove_dir_all(&work_dir).await;
                return Err(BuildError::CommandFailed {
                    command: "git clone".to_string(),
                    status: status.to_string(),
                });
            }
            (work_dir.clone(), Some(work_dir))
        };

        progress.emit(LogLevel::Info, format!("Running {}", self.command));
        let (program, args) = self.build_command_line(&out_dir)?;
        let run = self
            .run_streaming(
                &program,
                &args,
                &src_dir,
                &progress,
                LogLevel::Warn,
                Some(&src_dir),
            )
            .await;

        // 克隆目录一次性使用，无论成败都清掉
        if let Some(dir) = &cloned {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }

        let status = run?;
        if !status.success() {
            progress.emit(LogLevel::Error, format!("{program}: {status}"));
            return Err(BuildError::CommandFailed {
                command: self.command.clone(),
                status: status.to_string(),
            });
        }

        progress.emit(LogLevel::Info, "Site ready");
        Ok(BuildResult {
            url: self.site_url(&source),
            frame: self.frame.clone(),
        })
    }
}

/// 解析诊断行；能读到源文件时附上出错片段
fn parse_diagnostic(line: &str, src_dir: &Path) -> Option<Problem> {
    let caps = DIAGNOSTIC_RE.captures(line)?;
    let path = caps["path"].to_string();
    let line_no: u32 = caps["line"].parse().ok()?;
    let message = caps["message"].to_string();

    let mut problem = Problem {
        path: Some(path.clone()),
        message,
        begin_line: Some(line_no),
        end_line: Some(line_no),
        ..Default::default()
    };

    if let Some((snippet, offset)) = read_snippet(&src_dir.join(&path), line_no) {
        problem.source = Some(snippet);
        problem.offset = Some(offset);
    }
    Some(problem)
}

/// 取出错行前后各两行作为高亮片段，返回片段与首行行号
fn read_snippet(path: &Path, error_line: u32) -> Option<(String, u32)> {
    let content = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || error_line == 0 {
        return None;
    }
    let start = (error_line as usize).saturating_sub(3);
    let end = (error_line as usize + 2).min(lines.len());
    if start >= end {
        return None;
    }
    Some((lines[start..end].join("\n"), start as u32 + 1))
}
