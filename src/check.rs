use anyhow::Result;
use std::path::Path;

use crate::config::ServiceConfig;

pub struct CheckResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// 执行运行环境检查，依次验证配置、git、生成器命令和工作目录
pub fn run(project_root: &Path) -> Result<CheckResult> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_config(project_root, &mut errors, &mut warnings);
    check_git(&mut errors, &mut warnings);
    check_builder_command(project_root, &mut errors, &mut warnings);
    check_work_dirs(project_root, &mut errors, &mut warnings);

    Ok(CheckResult { errors, warnings })
}

fn check_config(root: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let config_path = root.join("sitecast.toml");
    if !config_path.exists() {
        warnings.push("缺少 sitecast.toml，将使用默认配置".to_string());
        return;
    }
    if let Err(e) = ServiceConfig::load(root) {
        errors.push(format!("sitecast.toml 解析失败: {e}"));
    }
}

fn check_git(errors: &mut Vec<String>, _warnings: &mut Vec<String>) {
    let probe = std::process::Command::new("git").arg("--version").output();
    if probe.is_err() {
        errors.push("找不到 git，无法克隆远程仓库".to_string());
    }
}

fn check_builder_command(root: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let config = match ServiceConfig::load_or_default(root) {
        Ok(cfg) => cfg,
        Err(_) => return,
    };

    let Some(program) = config.builder.command.split_whitespace().next() else {
        errors.push("builder.command 为空".to_string());
        return;
    };

    match std::process::Command::new(program).arg("--version").output() {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            errors.push(format!("找不到生成器命令 {program}"));
        }
        Err(e) => {
            warnings.push(format!("生成器命令 {program} 探测失败: {e}"));
        }
    }
}

fn check_work_dirs(root: &Path, errors: &mut Vec<String>, _warnings: &mut Vec<String>) {
    let config = match ServiceConfig::load_or_default(root) {
        Ok(cfg) => cfg,
        Err(_) => return,
    };

    for dir in [&config.builder.build_dir, &config.builder.sites_dir] {
        let path = root.join(dir);
        if let Err(e) = std::fs::create_dir_all(&path) {
            errors.push(format!("工作目录 {} 不可写: {e}", path.display()));
        }
    }
}
