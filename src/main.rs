use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod builder;
mod check;
mod config;
mod repository;
mod state;
mod stream;
mod web;

use builder::{SourceSpec, command::CommandBuilder};
use stream::events::LogLevel;
use stream::orchestrator::BuildOrchestrator;
use stream::session::{BuildOutcome, SessionMap};

#[derive(Parser)]
#[command(name = "sitecast", about = "Rust 站点试玩构建服务", version = long_version())]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动构建服务
    Serve {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// 监听地址
        #[arg(long)]
        host: Option<String>,

        /// 监听端口
        #[arg(long)]
        port: Option<u16>,
    },

    /// 在终端中构建一个站点并实时输出状态
    Build {
        /// 仓库地址或本地目录
        url: String,

        /// 构建分支
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// 检查运行环境
    Check {
        /// 项目根目录（默认当前目录）
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // None 等同于 Serve { root: ".", host: None, port: None }
    let command = cli.command.unwrap_or(Commands::Serve {
        root: PathBuf::from("."),
        host: None,
        port: None,
    });

    // 用配置中的日志级别作为默认值
    let default_level = match &command {
        Commands::Serve { root, .. }
        | Commands::Build { root, .. }
        | Commands::Check { root, .. } => {
            config::ServiceConfig::load(&root.canonicalize().unwrap_or_else(|_| root.clone()))
                .ok()
                .map(|c| c.server.log_level.clone())
        }
    };

    let default_level = default_level.as_deref().unwrap_or("info");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match command {
        Commands::Serve { root, host, port } => {
            let root = root.canonicalize()?;
            let service_config = config::ServiceConfig::load_or_default(&root)?;

            let host = host.unwrap_or_else(|| service_config.server.host.clone());
            let port = port.unwrap_or(service_config.server.port);

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async move { run_server(root, service_config, &host, port).await })?;
        }
        Commands::Build { url, branch, root } => {
            let root = root.canonicalize()?;
            let service_config = config::ServiceConfig::load_or_default(&root)?;

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async move { run_build(root, service_config, url, branch).await })?;
        }
        Commands::Check { root } => {
            let root = root.canonicalize()?;
            let result = check::run(&root)?;

            for w in &result.warnings {
                tracing::warn!("{w}");
            }
            for e in &result.errors {
                tracing::error!("{e}");
            }

            if result.errors.is_empty() {
                tracing::info!("检查通过（{} 个警告）", result.warnings.len());
            } else {
                anyhow::bail!(
                    "检查未通过：{} 个错误，{} 个警告",
                    result.errors.len(),
                    result.warnings.len()
                );
            }
        }
    }

    Ok(())
}

async fn run_server(
    root: PathBuf,
    service_config: config::ServiceConfig,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let app_state = state::AppState::new(root, service_config).await?;

    // 启动后台定时清理结束的构建会话
    web::cleanup::spawn_session_cleanup(app_state.clone());

    let app = web::router(app_state);

    let addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if let Some(info) = detect_port_process(port) {
                tracing::error!("端口 {port} 已被占用：{info}");
            } else {
                tracing::error!("端口 {port} 已被占用");
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!("构建服务启动：http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// 一次性构建：终端就是消费者，拉取同一套事件流直到终止事件
async fn run_build(
    root: PathBuf,
    service_config: config::ServiceConfig,
    url: String,
    branch: String,
) -> anyhow::Result<()> {
    let sessions = Arc::new(SessionMap::new());
    let command_builder = Arc::new(CommandBuilder::new(root, &service_config));
    let idle_timeout = (service_config.stream.idle_timeout_secs > 0).then(|| {
        std::time::Duration::from_secs(service_config.stream.idle_timeout_secs)
    });
    let orchestrator = BuildOrchestrator::new(command_builder, sessions, idle_timeout);

    let session = orchestrator.start(SourceSpec {
        url,
        branch,
        site_key: "local".to_string(),
    });

    let mut cursor = 0;
    loop {
        let mut rx = session.buffer.watch_sequence();
        let polled = session.poll(cursor);
        if polled.events.is_empty() {
            if rx.changed().await.is_err() {
                break;
            }
            continue;
        }
        cursor = polled.cursor;
        for event in &polled.events {
            match event.level {
                LogLevel::Debug => tracing::debug!("{}", event.value),
                LogLevel::Info => tracing::info!("{}", event.value),
                LogLevel::Warn => tracing::warn!("{}", event.value),
                LogLevel::Error => tracing::error!("{}", event.value),
            }
        }
        if polled.is_final {
            break;
        }
    }

    match session.outcome() {
        BuildOutcome::Succeeded(result) => {
            tracing::info!("产物地址：{}", result.url);
            Ok(())
        }
        BuildOutcome::Failed(reason) => anyhow::bail!("构建失败：{reason}"),
        BuildOutcome::Pending => anyhow::bail!("构建事件流意外中断"),
    }
}

/// 通过 /proc 检测占用指定端口的进程信息（仅 Linux）
fn detect_port_process(port: u16) -> Option<String> {
    use std::fs;

    let port_hex = format!("{:04X}", port);

    // 遍历 /proc/net/tcp 和 tcp6 查找本地监听端口
    for net_file in &["/proc/net/tcp", "/proc/net/tcp6"] {
        let content = fs::read_to_string(net_file).ok()?;
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            // fields[1] = local_address (hex_ip:hex_port), fields[3] = state (0A = LISTEN)
            if fields[3] != "0A" {
                continue;
            }
            if let Some(lport) = fields[1].rsplit(':').next()
                && lport == port_hex
                && let Some(inode) = fields.get(9)
            {
                return find_pid_by_inode(inode);
            }
        }
    }
    None
}

fn find_pid_by_inode(target_inode: &str) -> Option<String> {
    use std::fs;

    let socket_pattern = format!("socket:[{target_inode}]");
    for entry in fs::read_dir("/proc").ok()? {
        let entry = entry.ok()?;
        let pid_str = entry.file_name().to_string_lossy().to_string();
        if !pid_str.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let fd_dir = entry.path().join("fd");
        if let Ok(fds) = fs::read_dir(&fd_dir) {
            for fd in fds.flatten() {
                if let Ok(link) = fs::read_link(fd.path())
                    && link.to_string_lossy() == socket_pattern
                {
                    let comm = fs::read_to_string(entry.path().join("comm"))
                        .unwrap_or_default()
                        .trim()
                        .to_string();
                    return Some(format!("PID {pid_str} ({comm})"));
                }
            }
        }
    }
    None
}

const fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit:  ",
        env!("SITECAST_GIT_COMMIT"),
        "\nbuild:   ",
        env!("SITECAST_BUILD_TIME"),
        "\ntarget:  ",
        env!("SITECAST_BUILD_TARGET"),
        "\nprofile: ",
        env!("SITECAST_BUILD_PROFILE"),
    )
}
