//! A small template language used to describe packets.
//!
//! Strings may contain actions delimited by `{{` and `}}`. An action is a literal
//! (`42`, `"text"`), a context variable (`.name`) or a function call
//! (`random_int 1 10`, `random_payload (random_int 8 64)`). Maps and lists are
//! compiled recursively, other JSON values are kept as they are.

mod funcs;

use crate::error::TemplateError;
use funcs::Func;

use rand_core::SeedableRng;
use rand_pcg::Pcg32;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Variables available to `.name` expressions
pub type Context = Map<String, Value>;

/// The result of an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Int(i64),
    Str(String),
}

impl Scalar {
    fn as_int(&self, func: &'static str) -> Result<i64, TemplateError> {
        match self {
            Scalar::Int(i) => Ok(*i),
            Scalar::Str(s) => s.trim().parse().map_err(|_| TemplateError::Argument {
                name: func,
                msg: format!("\"{s}\" is not an integer"),
            }),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Scalar::Int(i) => Value::Number(Number::from(i)),
            Scalar::Str(s) => Value::String(s),
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Scalar::Str(String::new()),
            Some(Value::String(s)) => Scalar::Str(s.clone()),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => Scalar::Str(n.to_string()),
            },
            Some(v) => Scalar::Str(v.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

/// Mutable state used by the non-deterministic functions
#[derive(Debug, Clone)]
pub struct RenderState {
    rng: Pcg32,
    counters: HashMap<String, i64>,
    local_ip: Option<Ipv4Addr>,
}

impl RenderState {
    /// Without a seed, the generator is seeded from the current time
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        });
        RenderState {
            rng: Pcg32::seed_from_u64(seed),
            counters: HashMap::new(),
            local_ip: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Int(i64),
    Str(String),
    Var(String),
    Call(Func, Vec<Expr>),
}

impl Expr {
    fn eval(&self, ctx: &Context, state: &mut RenderState) -> Result<Scalar, TemplateError> {
        match self {
            Expr::Int(i) => Ok(Scalar::Int(*i)),
            Expr::Str(s) => Ok(Scalar::Str(s.clone())),
            Expr::Var(name) => Ok(Scalar::from_value(ctx.get(name))),
            Expr::Call(func, args) => {
                let args = args
                    .iter()
                    .map(|a| a.eval(ctx, state))
                    .collect::<Result<Vec<_>, _>>()?;
                func.call(&args, state)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Action(Expr),
}

/// A compiled string template
#[derive(Debug, Clone)]
pub struct TextTemplate {
    segments: Vec<Segment>,
}

impl TextTemplate {
    pub fn parse(src: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = src;
        let mut offset = 0;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body_start = start + 2;
            let end = rest[body_start..]
                .find("}}")
                .ok_or_else(|| TemplateError::Syntax {
                    pos: offset + start,
                    msg: "unclosed action".into(),
                })?;
            let body = &rest[body_start..body_start + end];
            segments.push(Segment::Action(parse_action(body, offset + body_start)?));
            let consumed = body_start + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(TextTemplate { segments })
    }

    /// A template made of a single action keeps the type of its result
    pub fn render(&self, ctx: &Context, state: &mut RenderState) -> Result<Value, TemplateError> {
        if let [Segment::Action(expr)] = self.segments.as_slice() {
            return Ok(expr.eval(ctx, state)?.into_value());
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Action(expr) => out.push_str(&expr.eval(ctx, state)?.to_string()),
            }
        }
        Ok(Value::String(out))
    }
}

/// A compiled nested structure
#[derive(Debug, Clone)]
pub enum Template {
    Text(TextTemplate),
    Map(Vec<(String, Template)>),
    List(Vec<Template>),
    Literal(Value),
}

impl Template {
    pub fn compile(raw: &Value) -> Result<Self, TemplateError> {
        Ok(match raw {
            Value::String(s) => Template::Text(TextTemplate::parse(s)?),
            Value::Object(map) => Template::Map(compile_map(map)?),
            Value::Array(items) => Template::List(
                items
                    .iter()
                    .map(Template::compile)
                    .collect::<Result<_, _>>()?,
            ),
            other => Template::Literal(other.clone()),
        })
    }

    pub fn render(&self, ctx: &Context, state: &mut RenderState) -> Result<Value, TemplateError> {
        Ok(match self {
            Template::Text(t) => t.render(ctx, state)?,
            Template::Map(fields) => {
                let mut out = Map::new();
                for (k, t) in fields {
                    out.insert(k.clone(), t.render(ctx, state)?);
                }
                Value::Object(out)
            }
            Template::List(items) => Value::Array(
                items
                    .iter()
                    .map(|t| t.render(ctx, state))
                    .collect::<Result<_, _>>()?,
            ),
            Template::Literal(v) => v.clone(),
        })
    }
}

fn compile_map(map: &Map<String, Value>) -> Result<Vec<(String, Template)>, TemplateError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), Template::compile(v)?)))
        .collect()
}

/// Compile and render a scalar expression in one go, as done for the host and port.
/// With a seed, the result is reproducible.
pub fn render_scalar(
    expr: &str,
    ctx: &Context,
    seed: Option<u64>,
) -> Result<String, TemplateError> {
    let template = TextTemplate::parse(expr)?;
    match template.render(ctx, &mut RenderState::new(seed))? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// The packet template of a job, compiled once and rendered at every iteration
#[derive(Debug, Clone)]
pub struct PacketTemplate {
    template: Template,
    state: RenderState,
}

impl PacketTemplate {
    pub fn compile(raw: &Map<String, Value>, seed: Option<u64>) -> Result<Self, TemplateError> {
        Ok(PacketTemplate {
            template: Template::Map(compile_map(raw)?),
            state: RenderState::new(seed),
        })
    }

    pub fn render(&mut self, ctx: &Context) -> Result<Value, TemplateError> {
        self.template.render(ctx, &mut self.state)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Var(String),
    Int(i64),
    Str(String),
    Open,
    Close,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(body: &str, base: usize) -> Result<Vec<(usize, Token)>, TemplateError> {
    let syntax = |pos: usize, msg: &str| TemplateError::Syntax {
        pos: base + pos,
        msg: msg.to_string(),
    };
    let mut tokens = Vec::new();
    let mut chars = body.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push((pos, Token::Open));
        } else if c == ')' {
            chars.next();
            tokens.push((pos, Token::Close));
        } else if c == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    None => return Err(syntax(pos, "unterminated string")),
                    Some((_, '"')) => break,
                    Some((p, '\\')) => match chars.next() {
                        Some((_, 'n')) => s.push('\n'),
                        Some((_, 't')) => s.push('\t'),
                        Some((_, e @ ('"' | '\\'))) => s.push(e),
                        _ => return Err(syntax(p, "invalid escape sequence")),
                    },
                    Some((_, other)) => s.push(other),
                }
            }
            tokens.push((pos, Token::Str(s)));
        } else if c == '.' {
            chars.next();
            let mut name = String::new();
            while let Some(&(_, c)) = chars.peek().filter(|(_, c)| is_ident_char(*c)) {
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(syntax(pos, "expected a variable name after '.'"));
            }
            tokens.push((pos, Token::Var(name)));
        } else if c == '-' || c.is_ascii_digit() {
            let mut digits = String::new();
            digits.push(c);
            chars.next();
            while let Some(&(_, c)) = chars.peek().filter(|(_, c)| c.is_ascii_digit()) {
                digits.push(c);
                chars.next();
            }
            let i = digits
                .parse()
                .map_err(|_| syntax(pos, "invalid integer literal"))?;
            tokens.push((pos, Token::Int(i)));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut name = String::new();
            while let Some(&(_, c)) = chars.peek().filter(|(_, c)| is_ident_char(*c)) {
                name.push(c);
                chars.next();
            }
            tokens.push((pos, Token::Ident(name)));
        } else {
            return Err(syntax(pos, &format!("unexpected character '{c}'")));
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    next: usize,
    base: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.next).map(|(_, t)| t)
    }

    fn pos(&self) -> usize {
        self.tokens
            .get(self.next)
            .map(|(p, _)| self.base + p)
            .unwrap_or(self.base + self.len)
    }

    fn error(&self, msg: &str) -> TemplateError {
        TemplateError::Syntax {
            pos: self.pos(),
            msg: msg.to_string(),
        }
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.next).map(|(_, t)| t.clone());
        self.next += 1;
        token
    }

    /// Top level of an action: a bare call may take arguments without parentheses
    fn action(&mut self) -> Result<Expr, TemplateError> {
        let expr = match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.next += 1;
                self.call(&name)?
            }
            Some(_) => self.arg()?,
            None => return Err(self.error("empty action")),
        };
        if self.peek().is_some() {
            return Err(self.error("unexpected token"));
        }
        Ok(expr)
    }

    fn call(&mut self, name: &str) -> Result<Expr, TemplateError> {
        let func = Func::from_name(name)?;
        let mut args = Vec::new();
        while !matches!(self.peek(), None | Some(Token::Close)) {
            args.push(self.arg()?);
        }
        func.check_arity(args.len())?;
        Ok(Expr::Call(func, args))
    }

    fn arg(&mut self) -> Result<Expr, TemplateError> {
        match self.bump() {
            Some(Token::Int(i)) => Ok(Expr::Int(i)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Var(v)) => Ok(Expr::Var(v)),
            Some(Token::Ident(name)) => {
                let func = Func::from_name(&name)?;
                func.check_arity(0)?;
                Ok(Expr::Call(func, Vec::new()))
            }
            Some(Token::Open) => {
                let Some(Token::Ident(name)) = self.bump() else {
                    self.next -= 1;
                    return Err(self.error("expected a function name after '('"));
                };
                let expr = self.call(&name)?;
                match self.bump() {
                    Some(Token::Close) => Ok(expr),
                    _ => {
                        self.next -= 1;
                        Err(self.error("expected ')'"))
                    }
                }
            }
            Some(Token::Close) => {
                self.next -= 1;
                Err(self.error("unexpected ')'"))
            }
            None => Err(self.error("unexpected end of action")),
        }
    }
}

fn parse_action(body: &str, base: usize) -> Result<Expr, TemplateError> {
    let tokens = tokenize(body, base)?;
    let mut parser = Parser {
        tokens,
        next: 0,
        base,
        len: body.len(),
    };
    parser.action()
}
