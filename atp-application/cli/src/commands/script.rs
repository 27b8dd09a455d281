//! 脚本求值命令

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use atp_scripting::{ScriptEngine, VariableScriptEngine};

pub async fn handle(action: crate::ScriptAction) -> Result<()> {
    match action {
        crate::ScriptAction::Eval { file } => eval_file(&file).await,
        crate::ScriptAction::Expr { expr } => eval_expr(&expr).await,
    }
}

async fn eval_file(path: &Path) -> Result<()> {
    let engine = VariableScriptEngine::new("cli");

    println!("{} 执行脚本: {}", "▶".cyan(), path.display());
    let value = engine
        .execute_file(path)
        .await
        .with_context(|| format!("脚本执行失败: {}", path.display()))?;

    println!("{} 结果: {}", "✓".green(), value);
    print_variables(&engine);
    Ok(())
}

async fn eval_expr(expr: &str) -> Result<()> {
    let engine = VariableScriptEngine::new("cli");
    let value = engine.execute_script(expr).await.context("表达式求值失败")?;

    println!("{}", value);
    Ok(())
}

fn print_variables(engine: &VariableScriptEngine) {
    let variables = engine.script_variables();
    if variables.is_empty() {
        return;
    }

    println!("\n{}", "脚本变量:".bold());
    for variable in variables {
        let value = engine
            .variable_raw(&variable.name)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "-".to_string());
        println!(
            "  {:<20} {:<8} {}",
            variable.name,
            variable.type_name.dimmed(),
            value
        );
    }
}
