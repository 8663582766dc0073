//! System prompt rendering

use chrono::{DateTime, Local};

use crate::tools::Tool;

const DEFAULT_PROMPT: &str = "You are an AI assistant that completes tasks by calling tools. \
Call one or more tools when you need information or need to act, and read each result before deciding what to do next.

Current date and time is {now}.";

const GUIDELINES: &str = "## Guidelines
- Use tools to gather information before responding
- If a tool call fails, read the error and try a different approach
- Be concise but thorough

When you have completed the task, provide a final answer without calling any more tools.";

/// Build the system prompt from an optional template
///
/// `{now}` in the template is replaced with `now` as `YYYY-MM-DD HH:MM:SS`.
pub fn render_system_prompt(template: Option<&str>, tools: &[Tool], now: DateTime<Local>) -> String {
    let stamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let mut prompt = template.unwrap_or(DEFAULT_PROMPT).trim().replace("{now}", &stamp);

    prompt.push_str("\n\n## Available Tools\n");
    if tools.is_empty() {
        prompt.push_str("(none)");
    } else {
        prompt.push_str(&format_tool_list(tools));
    }

    if template.is_none() {
        prompt.push_str("\n\n");
        prompt.push_str(GUIDELINES);
    }

    prompt
}

fn format_tool_list(tools: &[Tool]) -> String {
    tools
        .iter()
        .map(|t| {
            if t.description.is_empty() {
                format!("- {}", t.name)
            } else {
                format!("- {}: {}", t.name, t.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
