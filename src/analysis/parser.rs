use crate::error::{ExpenseError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Removes a surrounding markdown fence, preferring a ```python block.
pub fn strip_code_fences(text: &str) -> String {
    let text = text.trim();
    let body = if let Some((_, rest)) = text.split_once("```python") {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some((_, rest)) = text.split_once("```") {
        let block = rest.split("```").next().unwrap_or(rest);
        // A language tag on the fence line is not code.
        match block.split_once('\n') {
            Some((tag, code)) if !tag.trim().is_empty() && is_fence_tag(tag.trim()) => code,
            _ => block,
        }
    } else {
        text
    };
    body.trim().to_string()
}

fn is_fence_tag(tag: &str) -> bool {
    tag.chars().all(|c| c.is_ascii_alphanumeric()) && !tag.contains('(')
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Literal(Value),
    /// A bare name such as `df`, `result` or `fig`.
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub positional: Vec<Argument>,
    pub keywords: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Call(ToolCall),
    Literal(Value),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// 1-based line the statement starts on.
    pub line: usize,
    pub targets: Vec<String>,
    pub expression: Expression,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snippet {
    pub statements: Vec<Statement>,
}

impl Snippet {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.statements.iter().filter_map(|s| match &s.expression {
            Expression::Call(call) => Some(call),
            _ => None,
        })
    }
}

/// Parses generated analysis code.
///
/// Accepts either line-oriented assignments of tool calls
/// (`fig, result = plot_pie_chart(df, year=2024)`) or a JSON tool-call object
/// or array. Fences are stripped first.
pub fn parse_snippet(code: &str) -> Result<Snippet> {
    let code = strip_code_fences(code);
    if code.starts_with('{') || code.starts_with('[') {
        return parse_json_calls(&code);
    }
    let tokens = tokenize(&code)?;
    Parser { tokens, pos: 0 }.parse()
}

#[derive(Deserialize)]
struct JsonFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonCall {
    Wrapped { function: JsonFunction },
    Flat(JsonFunction),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonCalls {
    Many(Vec<JsonCall>),
    One(JsonCall),
}

fn parse_json_calls(code: &str) -> Result<Snippet> {
    let calls: JsonCalls = serde_json::from_str(code).map_err(|e| ExpenseError::SnippetParse {
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    })?;
    let calls = match calls {
        JsonCalls::Many(calls) => calls,
        JsonCalls::One(call) => vec![call],
    };

    let mut statements = Vec::with_capacity(calls.len());
    for (idx, call) in calls.into_iter().enumerate() {
        let function = match call {
            JsonCall::Wrapped { function } => function,
            JsonCall::Flat(function) => function,
        };
        // Some models send the arguments object as an encoded string.
        let arguments = match function.arguments {
            Value::String(encoded) => serde_json::from_str(&encoded)?,
            other => other,
        };
        let keywords = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ExpenseError::SnippetParse {
                    line: 1,
                    column: 1,
                    message: format!("arguments of '{}' must be an object, got {}", function.name, other),
                })
            }
        };
        statements.push(Statement {
            line: idx + 1,
            targets: vec!["fig".to_string(), "result".to_string()],
            expression: Expression::Call(ToolCall {
                name: function.name,
                positional: Vec::new(),
                keywords,
            }),
        });
    }
    Ok(Snippet { statements })
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(Value),
    LParen,
    RParen,
    Comma,
    Equals,
    Newline,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

fn parse_error(line: usize, column: usize, message: impl Into<String>) -> ExpenseError {
    ExpenseError::SnippetParse {
        line,
        column,
        message: message.into(),
    }
}

fn is_import_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("import ") || trimmed.starts_with("from ")
}

fn tokenize(code: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;

    for (line_idx, line) in code.lines().enumerate() {
        let line_no = line_idx + 1;
        if is_import_line(line) && depth == 0 {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let column = i + 1;
            let push = |tokens: &mut Vec<Token>, kind| {
                tokens.push(Token {
                    kind,
                    line: line_no,
                    column,
                })
            };

            match c {
                ' ' | '\t' | '\r' => i += 1,
                '#' => break,
                '(' => {
                    depth += 1;
                    push(&mut tokens, TokenKind::LParen);
                    i += 1;
                }
                ')' => {
                    if depth == 0 {
                        return Err(parse_error(line_no, column, "unbalanced ')'"));
                    }
                    depth -= 1;
                    push(&mut tokens, TokenKind::RParen);
                    i += 1;
                }
                ',' => {
                    push(&mut tokens, TokenKind::Comma);
                    i += 1;
                }
                '=' => {
                    push(&mut tokens, TokenKind::Equals);
                    i += 1;
                }
                '"' | '\'' => {
                    let (value, next) = read_string(&chars, i, line_no)?;
                    push(&mut tokens, TokenKind::Str(value));
                    i = next;
                }
                c if c.is_ascii_digit() || c == '.' || (c == '-' && starts_number(&chars, i + 1)) => {
                    let (value, next) = read_number(&chars, i, line_no)?;
                    push(&mut tokens, TokenKind::Number(value));
                    i = next;
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    let ident: String = chars[start..i].iter().collect();
                    push(&mut tokens, TokenKind::Ident(ident));
                }
                other => {
                    return Err(parse_error(
                        line_no,
                        column,
                        format!("unsupported character '{}'", other),
                    ))
                }
            }
        }

        if depth == 0 {
            tokens.push(Token {
                kind: TokenKind::Newline,
                line: line_no,
                column: chars.len() + 1,
            });
        }
    }

    if depth > 0 {
        let line = code.lines().count().max(1);
        return Err(parse_error(line, 1, "unclosed '(' at end of snippet"));
    }
    Ok(tokens)
}

fn starts_number(chars: &[char], at: usize) -> bool {
    chars
        .get(at)
        .is_some_and(|c| c.is_ascii_digit() || *c == '.')
}

fn read_string(chars: &[char], start: usize, line: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| parse_error(line, i + 1, "dangling escape"))?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((value, i + 1)),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    Err(parse_error(line, start + 1, "unterminated string literal"))
}

fn read_number(chars: &[char], start: usize, line: usize) -> Result<(Value, usize)> {
    let mut i = start;
    if chars[i] == '-' {
        i += 1;
    }
    while i < chars.len()
        && (chars[i].is_ascii_digit()
            || chars[i] == '.'
            || chars[i] == '_'
            || chars[i] == 'e'
            || chars[i] == 'E'
            || ((chars[i] == '-' || chars[i] == '+') && matches!(chars[i - 1], 'e' | 'E')))
    {
        i += 1;
    }
    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();

    if let Ok(int) = text.parse::<i64>() {
        return Ok((Value::from(int), i));
    }
    match text.parse::<f64>() {
        Ok(float) if float.is_finite() => Ok((Value::from(float), i)),
        _ => Err(parse_error(line, start + 1, format!("invalid number '{}'", text))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn unexpected(&self, expected: &str) -> ExpenseError {
        match self.peek() {
            Some(token) => parse_error(
                token.line,
                token.column,
                format!("expected {}, found {}", expected, describe(&token.kind)),
            ),
            None => {
                let (line, column) = self
                    .tokens
                    .last()
                    .map(|t| (t.line, t.column))
                    .unwrap_or((1, 1));
                parse_error(line, column, format!("expected {}, found end of snippet", expected))
            }
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<()> {
        if self.peek_kind(0) == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn parse(mut self) -> Result<Snippet> {
        let mut statements = Vec::new();
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Newline {
                self.pos += 1;
                continue;
            }
            statements.push(self.statement()?);
        }
        Ok(Snippet { statements })
    }

    fn statement(&mut self) -> Result<Statement> {
        let line = self.peek().map(|t| t.line).unwrap_or(1);

        let has_targets = matches!(self.peek_kind(0), Some(TokenKind::Ident(_)))
            && matches!(self.peek_kind(1), Some(TokenKind::Equals | TokenKind::Comma));
        let mut targets = Vec::new();
        if has_targets {
            loop {
                match self.next().map(|t| t.kind) {
                    Some(TokenKind::Ident(name)) => targets.push(name),
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("assignment target"));
                    }
                }
                match self.peek_kind(0) {
                    Some(TokenKind::Comma) => self.pos += 1,
                    Some(TokenKind::Equals) => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.unexpected("',' or '='")),
                }
            }
        }

        let expression = self.expression()?;
        match self.peek_kind(0) {
            None | Some(TokenKind::Newline) => {}
            _ => return Err(self.unexpected("end of line")),
        }

        Ok(Statement {
            line,
            targets,
            expression,
        })
    }

    fn expression(&mut self) -> Result<Expression> {
        let is_call = matches!(self.peek_kind(0), Some(TokenKind::Ident(_)))
            && self.peek_kind(1) == Some(&TokenKind::LParen);
        if is_call {
            if let Some(Token {
                kind: TokenKind::Ident(name),
                ..
            }) = self.next()
            {
                self.pos += 1;
                return Ok(Expression::Call(self.call_arguments(name)?));
            }
        }

        match self.argument()? {
            Argument::Literal(value) => Ok(Expression::Literal(value)),
            Argument::Name(name) => Ok(Expression::Name(name)),
        }
    }

    fn argument(&mut self) -> Result<Argument> {
        let token = self.next().ok_or_else(|| self.unexpected("a value"))?;
        match token.kind {
            TokenKind::Str(s) => Ok(Argument::Literal(Value::String(s))),
            TokenKind::Number(n) => Ok(Argument::Literal(n)),
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "True" => Argument::Literal(Value::Bool(true)),
                "False" => Argument::Literal(Value::Bool(false)),
                "None" => Argument::Literal(Value::Null),
                _ => Argument::Name(name),
            }),
            _ => {
                self.pos -= 1;
                Err(self.unexpected("a value"))
            }
        }
    }

    fn call_arguments(&mut self, name: String) -> Result<ToolCall> {
        let mut call = ToolCall {
            name,
            positional: Vec::new(),
            keywords: Map::new(),
        };

        loop {
            if self.peek_kind(0) == Some(&TokenKind::RParen) {
                self.pos += 1;
                return Ok(call);
            }

            let is_keyword = matches!(self.peek_kind(0), Some(TokenKind::Ident(_)))
                && self.peek_kind(1) == Some(&TokenKind::Equals);
            if is_keyword {
                let key_token = self.next().ok_or_else(|| self.unexpected("keyword"))?;
                self.pos += 1;
                let value = match self.argument()? {
                    Argument::Literal(value) => value,
                    Argument::Name(other) => {
                        return Err(parse_error(
                            key_token.line,
                            key_token.column,
                            format!("keyword values must be literals, found name '{}'", other),
                        ))
                    }
                };
                if let TokenKind::Ident(key) = key_token.kind {
                    if call.keywords.insert(key.clone(), value).is_some() {
                        return Err(parse_error(
                            key_token.line,
                            key_token.column,
                            format!("keyword '{}' given twice", key),
                        ));
                    }
                }
            } else {
                if !call.keywords.is_empty() {
                    let (line, column) = self.peek().map(|t| (t.line, t.column)).unwrap_or((1, 1));
                    return Err(parse_error(
                        line,
                        column,
                        "positional argument follows keyword argument",
                    ));
                }
                let argument = self.argument()?;
                call.positional.push(argument);
            }

            match self.peek_kind(0) {
                Some(TokenKind::Comma) => self.pos += 1,
                Some(TokenKind::RParen) => {}
                _ => return Err(self.unexpected("',' or ')'")),
            }
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("name '{}'", name),
        TokenKind::Str(s) => format!("string \"{}\"", s),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Equals => "'='".to_string(),
        TokenKind::Newline => "end of line".to_string(),
    }
}
