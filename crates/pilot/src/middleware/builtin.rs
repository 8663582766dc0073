//! Built-in middleware layers

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{MiddlewareContext, Next, ToolMiddleware, ToolOutcome};
use crate::error::ToolError;

type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Prints `Calling tool <name> with arguments <args>` before every call
pub struct CallToolLogMiddleware {
    sink: LineSink,
}

impl Default for CallToolLogMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CallToolLogMiddleware {
    /// Log to stdout
    pub fn new() -> Self {
        Self {
            sink: Arc::new(|line| println!("{}", line)),
        }
    }

    /// Send each line to `sink` instead of stdout
    pub fn with_sink(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }
}

/// Render the log line for a call
pub fn format_call_line(name: &str, arguments: &Map<String, Value>) -> String {
    let mut args = String::new();
    write_py_dict(&mut args, arguments);
    format!("Calling tool {} with arguments {}", name, args)
}

#[async_trait]
impl ToolMiddleware for CallToolLogMiddleware {
    async fn on_call_tool(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> ToolOutcome {
        let line = format_call_line(&ctx.request.name, &ctx.request.arguments);
        info!(tool = %ctx.request.name, provider = %ctx.provider, step = ctx.request.step, "{}", line);
        (self.sink)(&line);
        next.run(ctx).await
    }
}

/// Records how long the rest of the chain took
#[derive(Debug, Default)]
pub struct TimingMiddleware;

#[async_trait]
impl ToolMiddleware for TimingMiddleware {
    async fn on_call_tool(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> ToolOutcome {
        let start = std::time::Instant::now();
        let result = next.run(ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        ctx.annotate("elapsed_ms", elapsed_ms);
        debug!(
            tool = %ctx.request.name,
            provider = %ctx.provider,
            elapsed_ms,
            ok = result.is_ok(),
            "Tool call finished"
        );
        result
    }
}

/// Refuses calls to the listed tools without reaching the provider
#[derive(Debug, Default)]
pub struct DenyToolsMiddleware {
    denied: HashSet<String>,
}

impl DenyToolsMiddleware {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ToolMiddleware for DenyToolsMiddleware {
    async fn on_call_tool(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> ToolOutcome {
        if self.denied.contains(&ctx.request.name) {
            return Err(ToolError::Rejected {
                tool: ctx.request.name.clone(),
                reason: "tool is denied by configuration".to_string(),
            });
        }
        next.run(ctx).await
    }
}

// Python-literal rendering of JSON values, as printed in call log lines

fn write_py_dict(out: &mut String, map: &Map<String, Value>) {
    out.push('{');
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_py_str(out, key);
        out.push_str(": ");
        write_py_value(out, value);
    }
    out.push('}');
}

fn write_py_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => write_py_str(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_py_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_py_dict(out, map),
    }
}

fn write_py_str(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}
