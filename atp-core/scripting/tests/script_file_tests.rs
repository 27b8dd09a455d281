//! 脚本文件执行测试

use atp_scripting::*;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_execute_file_source() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();
    std::fs::write(
        dir.join("fixture.script"),
        "# 夹具初始化\nbase_url = 'http://localhost'\nretries = 3\n",
    )
    .unwrap();

    let engine: Arc<dyn ScriptEngine> = VariableScriptEngineFactory.create("fixture");
    let source = ScriptSource::File(PathBuf::from("fixture.script")).resolve(dir);
    engine.execute_source(&source).await.unwrap();

    assert_eq!(
        engine.variable_value::<String>("base_url").unwrap(),
        "http://localhost"
    );
    assert_eq!(engine.variable_value::<u32>("retries").unwrap(), 3);
}

#[tokio::test]
async fn test_missing_script_file() {
    let engine: Arc<dyn ScriptEngine> = VariableScriptEngineFactory.create("fixture");
    let source = ScriptSource::File(PathBuf::from("/nonexistent/atp/init.script"));

    let err = engine.execute_source(&source).await.unwrap_err();
    assert!(matches!(err, ScriptError::Io { .. }));
}

#[tokio::test]
async fn test_inline_source_uses_globals() {
    let engine: Arc<dyn ScriptEngine> = VariableScriptEngineFactory.create("test");
    engine.set_globals(serde_json::json!({"expected": 5}));

    let value = engine
        .execute_source(&ScriptSource::Inline("total = expected * 2".to_string()))
        .await
        .unwrap();
    assert_eq!(value, serde_json::json!(10));
}

#[test]
fn test_resolve_keeps_absolute_and_inline() {
    let base = PathBuf::from("/scripts");
    let absolute = ScriptSource::File(PathBuf::from("/etc/init.script"));
    assert_eq!(absolute.resolve(&base), absolute);

    let inline = ScriptSource::Inline("x = 1".to_string());
    assert_eq!(inline.resolve(&base), inline);

    let relative = ScriptSource::File(PathBuf::from("a.script"));
    assert_eq!(
        relative.resolve(&base),
        ScriptSource::File(PathBuf::from("/scripts/a.script"))
    );
}

#[test]
fn test_variable_conversion_error() {
    let engine: Arc<dyn ScriptEngine> = VariableScriptEngineFactory.create("test");
    engine
        .set_variable_value("name", serde_json::json!("alice"))
        .unwrap();

    let err = engine.variable_value::<i64>("name").unwrap_err();
    assert!(matches!(err, ScriptError::Serde { .. }));
}
