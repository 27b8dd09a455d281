//! 运行器配置命令

use anyhow::Result;
use colored::Colorize;

use atp_orchestrator::RunnerConfig;

use super::output;

pub fn handle(action: crate::ConfigAction) -> Result<()> {
    match action {
        crate::ConfigAction::Show { format } => show_config(&format),
    }
}

fn show_config(format: &str) -> Result<()> {
    let config = RunnerConfig::load()?;

    match format {
        "json" => output::print_json(&config)?,
        "yaml" => output::print_yaml(&config)?,
        _ => print!("{}", toml::to_string_pretty(&config)?),
    }

    if let Some(path) = config.manifest_path() {
        if !path.exists() {
            eprintln!("{} 数据源清单不存在: {}", "⚠".yellow(), path.display());
        }
    }
    Ok(())
}
