//! Tool dispatcher: fan-out/fan-in execution of the jobs from one iteration.
//!
//! Every job resolves on its own failure boundary. Unknown names, tool
//! errors and timeouts all become [`ToolOutcome::Error`] values, so one bad
//! job never aborts its siblings or the loop. Outcomes come back in job
//! order regardless of completion order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use mindloop_core::error::ToolError;
use mindloop_core::event::{DomainEvent, EventBus};
use mindloop_core::text::head_chars;
use mindloop_core::tool::{ToolContext, ToolJob, ToolOutcome, ToolRegistry};
use serde_json::Value;
use tracing::{debug, warn};

/// Serialized results up to this size pass through unchanged.
pub const SUMMARY_LIMIT: usize = 3000;

/// Oversized results are cut to this many characters.
pub const TRUNCATE_TO: usize = 2500;

pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Result objects with this `type` only have their text preview truncated.
pub const FETCH_CONTENT_TYPE: &str = "fetch_content";
pub const TEXT_PREVIEW_FIELD: &str = "textPreview";

pub const RETRY_HINT: &str =
    "The tool returned an error. Try a different approach, different parameters, or another tool.";

/// Default per-job wall-clock limit.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Executes tool jobs against a registry.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run all jobs, concurrently when there is more than one.
    pub async fn dispatch(&self, jobs: &[ToolJob], ctx: &ToolContext) -> Vec<ToolOutcome> {
        match jobs {
            [] => Vec::new(),
            [job] => vec![self.run_one(job, ctx).await],
            _ => join_all(jobs.iter().map(|job| self.run_one(job, ctx))).await,
        }
    }

    async fn run_one(&self, job: &ToolJob, ctx: &ToolContext) -> ToolOutcome {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.registry.execute(job, ctx)).await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: job.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(request_id = %ctx.request_id, tool = %job.name, duration_ms, "Tool succeeded"),
            Err(e) => warn!(request_id = %ctx.request_id, tool = %job.name, error = %e, "Tool failed"),
        }

        if let Some(events) = &self.events {
            events.publish(DomainEvent::ToolExecuted {
                request_id: ctx.request_id.clone(),
                tool_name: job.name.clone(),
                success: result.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        ToolOutcome::from(result)
    }
}

/// Serialize a result, shrinking it when it exceeds [`SUMMARY_LIMIT`].
pub fn summarize(value: &Value) -> String {
    let serialized = value.to_string();
    if serialized.chars().count() <= SUMMARY_LIMIT {
        return serialized;
    }

    if value.get("type").and_then(Value::as_str) == Some(FETCH_CONTENT_TYPE) {
        if let Some(preview) = value.get(TEXT_PREVIEW_FIELD).and_then(Value::as_str) {
            let mut trimmed = value.clone();
            trimmed[TEXT_PREVIEW_FIELD] =
                Value::String(format!("{}{TRUNCATION_MARKER}", head_chars(preview, TRUNCATE_TO)));
            return trimmed.to_string();
        }
    }

    format!("{}{TRUNCATION_MARKER}", head_chars(&serialized, TRUNCATE_TO))
}

/// Render one outcome as a conversation line (plus a hint for errors).
pub fn render(name: &str, outcome: &ToolOutcome) -> String {
    let line = format!("[Tool result for {name}]: {}", summarize(&outcome.to_value()));
    if outcome.is_error() {
        format!("{line}\n{RETRY_HINT}")
    } else {
        line
    }
}

/// Render all outcomes of one iteration into a single user entry, in job order.
pub fn render_all(jobs: &[ToolJob], outcomes: &[ToolOutcome]) -> String {
    jobs.iter()
        .zip(outcomes)
        .map(|(job, outcome)| render(&job.name, outcome))
        .collect::<Vec<_>>()
        .join("\n\n")
}
