//! 运行器配置管理
//!
//! 支持从多个源加载配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `ATP_RUNNER_CONFIG` 环境变量指定的路径
//! 2. `./runner.toml` / `./runner.yaml` / `./runner.json` (当前目录)
//! 3. `~/.config/atp/runner.toml` (用户配置目录)
//! 4. `/etc/atp/runner.toml` (系统配置目录)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use atp_executor::ScopeFileSystem;

/// 中止请求的生效粒度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortMode {
    /// 只在数据行之间检查中止请求
    #[default]
    BetweenRows,

    /// 中止令牌传递到用例上下文，正在执行的组件也会被打断
    Immediate,
}

impl FromStr for AbortMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "between_rows" | "between-rows" => Ok(AbortMode::BetweenRows),
            "immediate" => Ok(AbortMode::Immediate),
            other => anyhow::bail!("未知的中止模式: {}", other),
        }
    }
}

/// 测试运行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 数据目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// 脚本目录
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// 数据源清单 (相对数据目录)
    #[serde(default)]
    pub data_manifest: Option<PathBuf>,

    /// 中止模式
    #[serde(default)]
    pub abort_mode: AbortMode,

    /// 每个执行者完成后的延迟 (毫秒)
    #[serde(default)]
    pub post_action_delay_ms: u64,

    /// 第一个失败的数据行后停止会话
    #[serde(default)]
    pub stop_on_first_failure: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("./scripts")
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            scripts_dir: default_scripts_dir(),
            data_manifest: None,
            abort_mode: AbortMode::default(),
            post_action_delay_ms: 0,
            stop_on_first_failure: false,
        }
    }
}

impl RunnerConfig {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                tracing::debug!("加载配置文件: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                tracing::debug!("未找到配置文件，使用默认配置");
                Self::default()
            }
        };

        config.apply_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("解析 TOML 配置失败: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("解析 YAML 配置失败: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("解析 JSON 配置失败: {:?}", path))?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("ATP_RUNNER_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut candidates = vec![
            PathBuf::from("./runner.toml"),
            PathBuf::from("./runner.yaml"),
            PathBuf::from("./runner.json"),
        ];

        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config/atp/runner.toml"));
            candidates.push(home.join(".config/atp/runner.yaml"));
        }

        #[cfg(target_os = "linux")]
        {
            candidates.push(PathBuf::from("/etc/atp/runner.toml"));
            candidates.push(PathBuf::from("/etc/atp/runner.yaml"));
        }

        candidates.into_iter().find(|path| path.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// 用给定的查找函数覆盖配置项
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("ATP_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(dir) = lookup("ATP_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ATP_SCRIPTS_DIR") {
            self.scripts_dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("ATP_ABORT_MODE") {
            self.abort_mode = mode.parse().context("ATP_ABORT_MODE 取值无效")?;
        }
        if let Some(delay) = lookup("ATP_POST_ACTION_DELAY_MS") {
            self.post_action_delay_ms = delay
                .parse()
                .context("ATP_POST_ACTION_DELAY_MS 取值无效")?;
        }
        if let Some(stop) = lookup("ATP_STOP_ON_FIRST_FAILURE") {
            self.stop_on_first_failure = stop.parse().unwrap_or(false);
        }

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("数据目录不能为空");
        }
        if self.scripts_dir.as_os_str().is_empty() {
            anyhow::bail!("脚本目录不能为空");
        }
        Ok(())
    }

    /// 执行者完成后的延迟
    pub fn post_action_delay(&self) -> Duration {
        Duration::from_millis(self.post_action_delay_ms)
    }

    /// 上下文文件系统
    pub fn file_system(&self) -> ScopeFileSystem {
        ScopeFileSystem::new(&self.data_dir, &self.scripts_dir)
    }

    /// 数据源清单的完整路径
    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.data_manifest
            .as_ref()
            .map(|path| self.file_system().resolve_data(path))
    }
}
