//! ATP CLI 应用

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};

use atp_orchestrator::RunnerConfig;

mod commands;

#[derive(Parser)]
#[command(name = "atp")]
#[command(about = "ATP - 数据驱动的自动化测试运行器", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (未指定时取配置中的 log_level)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 数据源管理
    Data {
        #[command(subcommand)]
        action: DataAction,
    },

    /// 脚本求值
    Script {
        #[command(subcommand)]
        action: ScriptAction,
    },

    /// 运行器配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DataAction {
    /// 显示数据源的全部数据行
    Show {
        /// 数据源 ID
        id: String,

        /// 数据源清单文件 (默认取配置中的 data_manifest)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// 数据源后缀 (例如 _staging)
        #[arg(short, long)]
        suffix: Option<String>,

        /// 输出格式 (table/json/yaml)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// 列出清单中的数据源
    List {
        /// 数据源清单文件 (默认取配置中的 data_manifest)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ScriptAction {
    /// 执行脚本文件并显示变量
    Eval {
        /// 脚本文件路径
        file: PathBuf,
    },

    /// 计算单个表达式或语句
    Expr {
        /// 表达式
        expr: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 显示合并后的运行器配置
    Show {
        /// 输出格式 (toml/json/yaml)
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志，命令行参数优先于配置 (ATP_LOG_LEVEL)
    let log_level = cli
        .log_level
        .or_else(|| RunnerConfig::load().ok().map(|config| config.log_level))
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_max_level(parse_level(&log_level))
        .init();

    info!("ATP CLI 启动");

    match cli.command {
        Commands::Data { action } => commands::data::handle(action).await?,
        Commands::Script { action } => commands::script::handle(action).await?,
        Commands::Config { action } => commands::config::handle(action)?,
    }

    Ok(())
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
