//! 变量脚本解释器
//!
//! 语法:
//! ```text
//! stmt  := 'assert' expr | IDENT '=' expr | expr
//! expr  := sum (('==' | '!=' | '<' | '<=' | '>' | '>=') sum)?
//! sum   := term (('+' | '-') term)*
//! term  := unary (('*' | '/') unary)*
//! unary := '-' unary | atom
//! atom  := NUMBER | STRING | 'true' | 'false' | 'null' | IDENT | '(' expr ')'
//! ```
//! 语句以换行或 `;` 分隔，`#` 开始行注释。

use serde_json::{Number, Value};
use std::collections::BTreeMap;

use crate::{Result, ScriptError};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Assign,
    Op(BinaryOp),
    LParen,
    RParen,
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Assign { name: String, expr: Expr },
    Assert { expr: Expr, text: String },
    Expr(Expr),
}

/// 带行号的语句
#[derive(Debug, Clone)]
pub(crate) struct Line {
    pub line: usize,
    pub stmt: Stmt,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                tokens.push((line, Token::Separator));
                line += 1;
                i += 1;
            }
            ';' => {
                tokens.push((line, Token::Separator));
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((line, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((line, Token::RParen));
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                let op = match c {
                    '+' => BinaryOp::Add,
                    '-' => BinaryOp::Sub,
                    '*' => BinaryOp::Mul,
                    _ => BinaryOp::Div,
                };
                tokens.push((line, Token::Op(op)));
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let followed_by_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, followed_by_eq) {
                    ('=', true) => Token::Op(BinaryOp::Eq),
                    ('=', false) => Token::Assign,
                    ('!', true) => Token::Op(BinaryOp::Ne),
                    ('<', true) => Token::Op(BinaryOp::Le),
                    ('<', false) => Token::Op(BinaryOp::Lt),
                    ('>', true) => Token::Op(BinaryOp::Ge),
                    ('>', false) => Token::Op(BinaryOp::Gt),
                    _ => {
                        return Err(ScriptError::Parse {
                            line,
                            message: "意外的字符 '!'".to_string(),
                        })
                    }
                };
                tokens.push((line, token));
                i += if followed_by_eq { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err(ScriptError::Parse {
                                line,
                                message: "字符串未闭合".to_string(),
                            })
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => text.push('\n'),
                                Some('t') => text.push('\t'),
                                Some(other) => text.push(*other),
                                None => {}
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((line, Token::Str(text)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let token = if literal.contains('.') {
                    literal.parse::<f64>().map(Token::Float).ok()
                } else {
                    literal.parse::<i64>().map(Token::Int).ok()
                };
                let token = token.ok_or_else(|| ScriptError::Parse {
                    line,
                    message: format!("无效的数字: {}", literal),
                })?;
                tokens.push((line, token));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push((line, Token::Ident(ident)));
            }
            other => {
                return Err(ScriptError::Parse {
                    line,
                    message: format!("意外的字符 '{}'", other),
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(l, _)| *l)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    fn statements(&mut self) -> Result<Vec<Line>> {
        let mut lines = Vec::new();
        loop {
            while self.peek() == Some(&Token::Separator) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(lines);
            }
            let line = self.line();
            let stmt = self.statement()?;
            match self.peek() {
                None | Some(Token::Separator) => {}
                Some(other) => return Err(self.error(format!("多余的符号: {:?}", other))),
            }
            lines.push(Line { line, stmt });
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        if let Some(Token::Ident(name)) = self.peek() {
            let name = name.clone();
            if name == "assert" {
                self.pos += 1;
                let start = self.pos;
                let expr = self.expression()?;
                let text = render(&self.tokens[start..self.pos]);
                return Ok(Stmt::Assert { expr, text });
            }
            if self.tokens.get(self.pos + 1).map(|(_, t)| t) == Some(&Token::Assign) {
                self.pos += 2;
                let expr = self.expression()?;
                return Ok(Stmt::Assign { name, expr });
            }
        }
        Ok(Stmt::Expr(self.expression()?))
    }

    fn expression(&mut self) -> Result<Expr> {
        let left = self.sum()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if matches!(
                op,
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
            ) {
                self.pos += 1;
                let right = self.sum()?;
                return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    fn sum(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Op(BinaryOp::Sub)) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| self.error("无效的浮点数")),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Some(Token::LParen) => {
                let expr = self.expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(self.error("缺少 ')'")),
                }
            }
            Some(other) => Err(self.error(format!("意外的符号: {:?}", other))),
            None => Err(self.error("表达式不完整")),
        }
    }
}

fn render(tokens: &[(usize, Token)]) -> String {
    tokens
        .iter()
        .map(|(_, token)| match token {
            Token::Int(n) => n.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Str(s) => format!("{:?}", s),
            Token::Ident(name) => name.clone(),
            Token::Assign => "=".to_string(),
            Token::Op(op) => op.symbol().to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Separator => ";".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// 解析脚本
pub(crate) fn parse(source: &str) -> Result<Vec<Line>> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.statements()
}

/// 执行解析后的脚本，变量修改直接写入 `variables`
pub(crate) fn execute(
    lines: &[Line],
    variables: &mut BTreeMap<String, Value>,
    globals: &Value,
) -> Result<Value> {
    let mut last = Value::Null;
    for Line { line, stmt } in lines {
        last = match stmt {
            Stmt::Assign { name, expr } => {
                let value = evaluate(expr, variables, globals)?;
                variables.insert(name.clone(), value.clone());
                value
            }
            Stmt::Assert { expr, text } => {
                let value = evaluate(expr, variables, globals)?;
                if value != Value::Bool(true) {
                    return Err(ScriptError::AssertionFailed {
                        line: *line,
                        expression: text.clone(),
                    });
                }
                value
            }
            Stmt::Expr(expr) => evaluate(expr, variables, globals)?,
        };
    }
    Ok(last)
}

fn lookup(name: &str, variables: &BTreeMap<String, Value>, globals: &Value) -> Result<Value> {
    if let Some(value) = variables.get(name) {
        return Ok(value.clone());
    }

    let mut segments = name.split('.');
    let head = segments.next().unwrap_or(name);
    let mut current = match variables.get(head) {
        Some(value) => value,
        None => globals
            .get(head)
            .ok_or_else(|| ScriptError::UndefinedVariable(name.to_string()))?,
    };
    for segment in segments {
        current = current
            .get(segment)
            .ok_or_else(|| ScriptError::UndefinedVariable(name.to_string()))?;
    }
    Ok(current.clone())
}

fn evaluate(expr: &Expr, variables: &BTreeMap<String, Value>, globals: &Value) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => lookup(name, variables, globals),
        Expr::Neg(inner) => match evaluate(inner, variables, globals)? {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(-i))
                } else {
                    float_value(-n.as_f64().unwrap_or_default())
                }
            }
            other => Err(ScriptError::Type(format!("无法对 {} 取负", other))),
        },
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, variables, globals)?;
            let right = evaluate(right, variables, globals)?;
            binary(*op, left, right)
        }
    }
}

fn float_value(f: f64) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ScriptError::Type("计算结果不是有限数".to_string()))
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&left, &right))),
        _ => {}
    }

    if op == BinaryOp::Add && (left.is_string() || right.is_string()) {
        return Ok(Value::String(format!("{}{}", display(&left), display(&right))));
    }

    if let (Value::String(a), Value::String(b)) = (&left, &right) {
        let ordering = a.cmp(b);
        return match op {
            BinaryOp::Lt => Ok(Value::Bool(ordering.is_lt())),
            BinaryOp::Le => Ok(Value::Bool(ordering.is_le())),
            BinaryOp::Gt => Ok(Value::Bool(ordering.is_gt())),
            BinaryOp::Ge => Ok(Value::Bool(ordering.is_ge())),
            _ => Err(ScriptError::Type(format!(
                "字符串不支持运算符 {}",
                op.symbol()
            ))),
        };
    }

    let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
        return Err(ScriptError::Type(format!(
            "运算符 {} 不支持 {} 与 {}",
            op.symbol(),
            left,
            right
        )));
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div if y == 0 => {
                return Err(ScriptError::Type("除数为零".to_string()));
            }
            BinaryOp::Div if x.checked_rem(y) != Some(0) => return float_value(x as f64 / y as f64),
            BinaryOp::Div => x.checked_div(y),
            BinaryOp::Lt => return Ok(Value::Bool(x < y)),
            BinaryOp::Le => return Ok(Value::Bool(x <= y)),
            BinaryOp::Gt => return Ok(Value::Bool(x > y)),
            BinaryOp::Ge => return Ok(Value::Bool(x >= y)),
            BinaryOp::Eq | BinaryOp::Ne => unreachable!("equality handled above"),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| ScriptError::Type("整数溢出".to_string()));
    }

    let x = a.as_f64().unwrap_or_default();
    let y = b.as_f64().unwrap_or_default();
    match op {
        BinaryOp::Add => float_value(x + y),
        BinaryOp::Sub => float_value(x - y),
        BinaryOp::Mul => float_value(x * y),
        BinaryOp::Div => float_value(x / y),
        BinaryOp::Lt => Ok(Value::Bool(x < y)),
        BinaryOp::Le => Ok(Value::Bool(x <= y)),
        BinaryOp::Gt => Ok(Value::Bool(x > y)),
        BinaryOp::Ge => Ok(Value::Bool(x >= y)),
        BinaryOp::Eq | BinaryOp::Ne => unreachable!("equality handled above"),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str, variables: &mut BTreeMap<String, Value>) -> Result<Value> {
        let lines = parse(source)?;
        execute(&lines, variables, &json!({"row": {"name": "alice"}, "limit": 3}))
    }

    #[test]
    fn test_assignment_and_arithmetic() {
        let mut vars = BTreeMap::new();
        let value = run("counter = 1\ncounter = counter + 2 * 3; counter", &mut vars).unwrap();
        assert_eq!(value, json!(7));
        assert_eq!(vars["counter"], json!(7));
    }

    #[test]
    fn test_string_concat_and_globals() {
        let mut vars = BTreeMap::new();
        let value = run("greeting = 'hi ' + row.name", &mut vars).unwrap();
        assert_eq!(value, json!("hi alice"));
    }

    #[test]
    fn test_comparison_and_assert() {
        let mut vars = BTreeMap::new();
        assert!(run("x = 2\nassert x < limit", &mut vars).is_ok());

        let err = run("assert x == 5 # 注释", &mut vars).unwrap_err();
        match err {
            ScriptError::AssertionFailed { line, expression } => {
                assert_eq!(line, 1);
                assert_eq!(expression, "x == 5");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_division_and_negation() {
        let mut vars = BTreeMap::new();
        assert_eq!(run("6 / 3", &mut vars).unwrap(), json!(2));
        assert_eq!(run("7 / 2", &mut vars).unwrap(), json!(3.5));
        assert_eq!(run("-(1 + 2)", &mut vars).unwrap(), json!(-3));
        assert!(matches!(run("1 / 0", &mut vars), Err(ScriptError::Type(_))));
    }

    #[test]
    fn test_undefined_variable() {
        let mut vars = BTreeMap::new();
        assert!(matches!(
            run("missing + 1", &mut vars),
            Err(ScriptError::UndefinedVariable(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("x = (1 + 2"), Err(ScriptError::Parse { .. })));
        assert!(matches!(parse("x = 'open"), Err(ScriptError::Parse { .. })));
        assert!(matches!(parse("1 2"), Err(ScriptError::Parse { .. })));
        assert!(matches!(parse("a ! b"), Err(ScriptError::Parse { .. })));
    }
}
