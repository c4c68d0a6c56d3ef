use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub site: SiteInfo,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
}

#[derive(Debug, Deserialize)]
pub struct SiteInfo {
    #[serde(default = "default_title")]
    pub title: String,
    /// 服务对外基础 URL，构建产物地址由它拼出
    #[serde(default = "default_site_url")]
    pub url: String,
    /// 构建结果默认加载到的显示目标
    #[serde(default = "default_frame")]
    pub frame: String,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamConfig {
    /// 构建无输出多久后发 timeout 提醒事件；0 关闭监视
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// SSE keep-alive 心跳间隔
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// 会话结束后保留多久供断线重连重放
    #[serde(default = "default_retention")]
    pub session_retention_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct BuilderConfig {
    /// 生成器命令；{output} 占位符替换为产物目录，缺省时追加为末参
    #[serde(default = "default_build_command")]
    pub command: String,
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    /// 克隆工作目录（项目根目录下）
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
    /// 构建产物目录（项目根目录下，静态托管于 /sites）
    #[serde(default = "default_sites_dir")]
    pub sites_dir: String,
}

impl ServiceConfig {
    /// 没有配置文件时用默认值启动；有但解析失败仍然报错
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        if project_root.join("sitecast.toml").exists() {
            Self::load(project_root)
        } else {
            tracing::info!("未找到 sitecast.toml，使用默认配置");
            Ok(Self::default())
        }
    }

    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join("sitecast.toml");
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("读取 sitecast.toml 失败：{}", e))?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("解析 sitecast.toml 失败：{}", e))?;
        Ok(config)
    }
}

// 默认值函数
fn default_title() -> String { "sitecast".into() }
fn default_site_url() -> String { "http://127.0.0.1:3000".into() }
fn default_frame() -> String { "preview".into() }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3000 }
fn default_log_level() -> String { "info".into() }
fn default_idle_timeout() -> u64 { 30 }
fn default_keep_alive() -> u64 { 15 }
fn default_retention() -> u64 { 300 }
fn default_build_command() -> String { "zola build --force --output-dir {output}".into() }
fn default_clone_depth() -> u32 { 1 }
fn default_build_dir() -> String { "builds".into() }
fn default_sites_dir() -> String { "sites".into() }

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            title: default_title(),
            url: default_site_url(),
            frame: default_frame(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            keep_alive_secs: default_keep_alive(),
            session_retention_secs: default_retention(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            clone_depth: default_clone_depth(),
            build_dir: default_build_dir(),
            sites_dir: default_sites_dir(),
        }
    }
}
