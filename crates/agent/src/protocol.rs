//! Tag protocol embedded in model output.
//!
//! ```text
//! <<THINK>> private reasoning <</THINK>>
//! <<TOOL:NAME>>
//! <<TOOL:NAME:parameter, possibly
//! spanning lines>>
//! ```
//!
//! [`parse`] turns raw output into an ordered list of [`Segment`]s so the
//! loop never pattern-matches on raw text. A think block swallows anything
//! inside it, tool tags included. Markers that are never closed, or tool
//! tags with an invalid name, stay in the text literally.

use mindloop_core::tool::{ToolDefinition, ToolJob};

pub const THINK_OPEN: &str = "<<THINK>>";
pub const THINK_CLOSE: &str = "<</THINK>>";
pub const TOOL_OPEN: &str = "<<TOOL:";
pub const TAG_CLOSE: &str = ">>";

/// One piece of model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Think(String),
    Tool(ToolJob),
    Text(String),
}

/// Split raw model output into think, tool and text segments, in order.
pub fn parse(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while pos < raw.len() {
        let rest = &raw[pos..];
        let next_think = rest.find(THINK_OPEN);
        let next_tool = rest.find(TOOL_OPEN);

        let (offset, is_think) = match (next_think, next_tool) {
            (None, None) => {
                text.push_str(rest);
                break;
            }
            (Some(t), None) => (t, true),
            (None, Some(u)) => (u, false),
            (Some(t), Some(u)) => {
                if t < u {
                    (t, true)
                } else {
                    (u, false)
                }
            }
        };

        text.push_str(&rest[..offset]);
        let tag = &rest[offset..];

        let consumed = if is_think {
            parse_think(tag).map(|(inner, len)| (Segment::Think(inner.trim().to_string()), len))
        } else {
            parse_tool(tag).map(|(job, len)| (Segment::Tool(job), len))
        };

        match consumed {
            Some((segment, len)) => {
                flush_text(&mut text, &mut segments);
                segments.push(segment);
                pos += offset + len;
            }
            None => {
                // Not a complete tag: keep the opening marker as text
                let marker = if is_think { THINK_OPEN } else { TOOL_OPEN };
                text.push_str(marker);
                pos += offset + marker.len();
            }
        }
    }

    flush_text(&mut text, &mut segments);
    segments
}

fn flush_text(text: &mut String, segments: &mut Vec<Segment>) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}

/// `tag` starts at `<<THINK>>`. Returns the inner text and bytes consumed.
fn parse_think(tag: &str) -> Option<(&str, usize)> {
    let body = &tag[THINK_OPEN.len()..];
    let end = body.find(THINK_CLOSE)?;
    Some((&body[..end], THINK_OPEN.len() + end + THINK_CLOSE.len()))
}

/// `tag` starts at `<<TOOL:`. Returns the job and bytes consumed.
fn parse_tool(tag: &str) -> Option<(ToolJob, usize)> {
    let body = &tag[TOOL_OPEN.len()..];
    let name_len = identifier_len(body);
    if name_len == 0 {
        return None;
    }
    let name = &body[..name_len];
    let after = &body[name_len..];

    if after.starts_with(TAG_CLOSE) {
        let len = TOOL_OPEN.len() + name_len + TAG_CLOSE.len();
        return Some((ToolJob::new(name, ""), len));
    }

    let param_body = after.strip_prefix(':')?;
    let end = param_body.find(TAG_CLOSE)?;
    let len = TOOL_OPEN.len() + name_len + 1 + end + TAG_CLOSE.len();
    Some((ToolJob::new(name, &param_body[..end]), len))
}

/// Length in bytes of a leading `[A-Za-z_][A-Za-z0-9_]*`.
fn identifier_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Render a job back into its wire form.
pub fn tool_tag(job: &ToolJob) -> String {
    if job.parameter.is_empty() {
        format!("{TOOL_OPEN}{}{TAG_CLOSE}", job.name)
    } else {
        format!("{TOOL_OPEN}{}:{}{TAG_CLOSE}", job.name, job.parameter)
    }
}

/// Parsed model output with the views the loop needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub segments: Vec<Segment>,
}

impl ParsedOutput {
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: parse(raw),
        }
    }

    pub fn thoughts(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Think(t) => Some(t.as_str()),
            _ => None,
        })
    }

    pub fn think_chars(&self) -> usize {
        self.thoughts().map(|t| t.chars().count()).sum()
    }

    pub fn tool_jobs(&self) -> Vec<ToolJob> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Tool(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    /// Think blocks stripped, tool tags kept. Used for the assistant entry.
    pub fn cleaned(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Think(_) => None,
                Segment::Tool(job) => Some(tool_tag(job)),
                Segment::Text(t) => Some(t.clone()),
            })
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Only the plain text, trimmed. This is the user-visible answer.
    pub fn answer_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<String>()
            .trim()
            .to_string()
    }
}

const PROTOCOL_INSTRUCTIONS: &str = "\
You may reason privately before answering by writing <<THINK>> your reasoning <</THINK>>. \
The user never sees it.
To use a tool, write <<TOOL:NAME>> or <<TOOL:NAME:parameter>>. You may request several tools \
in one reply; they run together and their results come back in the next message as \
[Tool result for NAME]: ... lines.
When you have everything you need, reply with the final answer and no tool tags.";

/// The system directive: base prompt, tag protocol, available tools.
pub fn system_directive(base_prompt: &str, tools: &[ToolDefinition]) -> String {
    let mut directive = format!("{}\n\n{PROTOCOL_INSTRUCTIONS}", base_prompt.trim());
    if !tools.is_empty() {
        directive.push_str("\n\nAvailable tools:");
        for tool in tools {
            directive.push_str(&format!("\n- {}: {}", tool.name, tool.description));
        }
    }
    directive
}
