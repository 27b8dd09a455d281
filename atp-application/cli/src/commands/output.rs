//! CLI 通用输出格式化模块
//!
//! 数据行支持 table/json/yaml 三种输出格式

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

const COLUMN_WIDTH: usize = 20;

/// 数据行的列标题: 按首次出现的顺序收集所有对象字段
fn headers(rows: &[Value]) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        if let Value::Object(map) = row {
            for key in map.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
    }
    headers
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn line(cells: &[String]) -> String {
    cells
        .iter()
        .map(|c| format!("{:<width$}", c, width = COLUMN_WIDTH))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 表格格式输出，第一列为行号
pub fn print_table(rows: &[Value]) {
    let columns = headers(rows);

    let mut header = vec!["#".to_string()];
    header.extend(columns.iter().cloned());
    let header_line = line(&header);
    println!("{}", header_line);
    println!("{}", "-".repeat(header_line.len()));

    for (index, row) in rows.iter().enumerate() {
        let mut cells = vec![index.to_string()];
        match row {
            Value::Object(map) => cells.extend(columns.iter().map(|c| cell(map.get(c)))),
            other => cells.push(cell(Some(other))),
        }
        println!("{}", line(&cells));
    }
}

/// JSON 格式输出
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// YAML 格式输出
pub fn print_yaml<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

/// 根据格式参数选择输出方式
pub fn output_rows(rows: &[Value], format: &str) -> Result<()> {
    match format {
        "json" => print_json(rows)?,
        "yaml" => print_yaml(rows)?,
        _ => print_table(rows),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_keep_first_seen_order() {
        let rows = vec![json!({"user": "a", "age": 1}), json!({"user": "b", "role": "admin"})];
        let headers = headers(&rows);
        assert_eq!(headers.len(), 3);
        assert!(headers.contains(&"role".to_string()));
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell(None), "-");
        assert_eq!(cell(Some(&json!("text"))), "text");
        assert_eq!(cell(Some(&json!(42))), "42");
    }
}
