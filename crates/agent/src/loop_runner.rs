//! The agent reasoning loop implementation.
//!
//! One request runs a small state machine:
//!
//! ```text
//! AwaitModel ──► Parse ──► Done
//!     ▲            │
//!     │            ▼
//!     └──── DispatchTools
//! ```
//!
//! Iterations are strictly sequential. The only parallelism inside a request
//! is tool dispatch, and the loop waits for every job before calling the
//! model again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use mindloop_config::AppConfig;
use mindloop_core::error::Error;
use mindloop_core::event::{DomainEvent, EventBus};
use mindloop_core::memory::HistoryMessage;
use mindloop_core::message::{ChatMessage, Role};
use mindloop_core::provider::{Embedder, ModelClient, ModelSettings};
use mindloop_core::tool::{ToolContext, ToolJob, ToolRegistry};
use mindloop_memory::relevance::COMPOSE_THRESHOLD;
use mindloop_memory::{MemoryStore, RelevanceFilter};
use mindloop_tools::{ToolDispatcher, render, render_all};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{ContextComposer, TurnInput, trim_to_budget};
use crate::maintenance::{MaintenanceReport, MaintenanceScheduler, MaintenanceSettings};
use crate::patterns::decompose::{SubtaskOrchestrator, SubtaskResult, is_multi_phase};
use crate::protocol::{ParsedOutput, system_directive};
use crate::stream_event::{AgentStreamEvent, EventSink};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with a long-term memory. \
Use what you remember about the user when it helps, and keep answers focused.";

pub const DEFAULT_MAX_ITERATIONS: usize = 12;

/// Character budget for the message stack.
pub const DEFAULT_CONTEXT_BUDGET: usize = 48_000;

/// Loop states. `Done` is terminal.
#[derive(Debug)]
enum LoopState {
    AwaitModel,
    Parse(String),
    DispatchTools(Vec<ToolJob>),
    Done(Answer),
}

/// The final answer of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Answer {
    Text(String),
    /// The loop ran out of iterations, or the model replied with nothing.
    NoResponse,
}

impl Answer {
    pub(crate) fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            Self::NoResponse
        } else {
            Self::Text(text)
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::NoResponse => None,
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// Diagnostics for one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationLog {
    pub iteration: usize,
    pub output_chars: usize,
    pub think_chars: usize,
    /// Tool names dispatched this iteration, in order
    pub tools: Vec<String>,
    pub duration_ms: u64,
}

/// What one run of the loop (or one orchestrated run) produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub answer: Answer,
    pub execution_log: Vec<IterationLog>,
    pub active_skills: Vec<String>,
    pub iterations: usize,
    pub subtasks: Vec<SubtaskResult>,
}

/// The result handed back to the host.
#[derive(Debug)]
pub struct RequestResult {
    pub request_id: String,
    pub answer: Answer,
    pub execution_log: Vec<IterationLog>,
    pub subtasks: Vec<SubtaskResult>,
    /// Background maintenance, if it was queued. Await it for the report or
    /// drop it to detach.
    pub maintenance: Option<JoinHandle<MaintenanceReport>>,
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    settings: ModelSettings,
    store: MemoryStore,
    embedder: Option<Arc<dyn Embedder>>,
    dispatcher: ToolDispatcher,
    events: Arc<EventBus>,
    base_prompt: String,
    max_iterations: usize,
    context_budget: usize,
    compose_threshold: f32,
    decomposition: bool,
    maintenance: Option<MaintenanceSettings>,
}

impl AgentLoop {
    /// Create a loop with default limits, no embedder and maintenance on.
    pub fn new(
        model: Arc<dyn ModelClient>,
        settings: ModelSettings,
        store: MemoryStore,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            model,
            settings,
            store,
            embedder: None,
            dispatcher: ToolDispatcher::new(registry),
            events: Arc::new(EventBus::default()),
            base_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            compose_threshold: COMPOSE_THRESHOLD,
            decomposition: false,
            maintenance: Some(MaintenanceSettings::default()),
        }
    }

    /// Build a loop from configuration. The host supplies the transports.
    pub fn from_config(
        config: &AppConfig,
        model: Arc<dyn ModelClient>,
        embedder: Option<Arc<dyn Embedder>>,
        store: MemoryStore,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let settings = ModelSettings {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
        };
        let maintenance = config
            .maintenance
            .enabled
            .then(|| MaintenanceSettings::from(&config.maintenance));

        let mut agent = Self::new(model, settings, store, registry)
            .with_max_iterations(config.agent.max_iterations as usize)
            .with_context_budget(config.agent.context_char_budget)
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs))
            .with_compose_threshold(config.memory.compose_threshold)
            .with_decomposition(config.agent.decomposition)
            .with_maintenance(maintenance);
        if let Some(prompt) = &config.agent.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }
        if let Some(embedder) = embedder {
            agent = agent.with_embedder(embedder);
        }
        agent
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Publish domain events on `events` (the dispatcher included).
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.dispatcher = self.dispatcher.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    /// Set the maximum number of model calls per request.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_context_budget(mut self, chars: usize) -> Self {
        self.context_budget = chars;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn with_compose_threshold(mut self, threshold: f32) -> Self {
        self.compose_threshold = threshold;
        self
    }

    /// Allow multi-phase requests to be split into subtasks.
    pub fn with_decomposition(mut self, enabled: bool) -> Self {
        self.decomposition = enabled;
        self
    }

    /// `None` disables background maintenance.
    pub fn with_maintenance(mut self, settings: Option<MaintenanceSettings>) -> Self {
        self.maintenance = settings;
        self
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub(crate) fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    pub(crate) fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub(crate) fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    /// Process one turn.
    pub async fn run(&self, input: TurnInput) -> Result<RequestResult, Error> {
        self.run_with_events(input, None).await
    }

    /// Process one turn, streaming [`AgentStreamEvent`]s to `events`.
    ///
    /// Model-call and memory-read failures propagate. Tool failures and
    /// maintenance failures never do.
    pub async fn run_with_events(
        &self,
        input: TurnInput,
        events: Option<UnboundedSender<AgentStreamEvent>>,
    ) -> Result<RequestResult, Error> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let sink = EventSink::new(events);
        info!(
            request_id = %request_id,
            chars = input.message.chars().count(),
            "Processing request"
        );

        let history = self.store.chat_history().await?;

        let mut orchestrated = None;
        if self.decomposition && is_multi_phase(&input.message) {
            orchestrated = SubtaskOrchestrator::new(self)
                .run(&input, &history, &sink, &request_id)
                .await?;
        }
        let outcome = match orchestrated {
            Some(outcome) => outcome,
            None => self.run_loop(&input, &history, &sink, &request_id).await?,
        };

        self.events.publish(DomainEvent::ResponseGenerated {
            request_id: request_id.clone(),
            iterations: outcome.iterations,
            answered: outcome.answer.is_response(),
            timestamp: Utc::now(),
        });

        let maintenance = match &outcome.answer {
            Answer::Text(text) => {
                self.record_turn(&input.message, text).await;
                self.maintenance.as_ref().map(|cadence| {
                    MaintenanceScheduler::new(
                        self.store.clone(),
                        self.model.clone(),
                        self.settings.clone(),
                        cadence.clone(),
                    )
                    .with_events(self.events.clone())
                    .schedule(outcome.active_skills.clone())
                })
            }
            Answer::NoResponse => {
                warn!(request_id = %request_id, iterations = outcome.iterations, "No response produced");
                None
            }
        };

        sink.emit(AgentStreamEvent::Answer {
            request_id: request_id.clone(),
            content: outcome.answer.text().map(str::to_string),
            iterations: outcome.iterations,
        });

        Ok(RequestResult {
            request_id,
            answer: outcome.answer,
            execution_log: outcome.execution_log,
            subtasks: outcome.subtasks,
            maintenance,
        })
    }

    async fn record_turn(&self, message: &str, answer: &str) {
        let turn = [
            HistoryMessage::new(Role::User, message),
            HistoryMessage::new(Role::Assistant, answer),
        ];
        if let Err(e) = self.store.append_history(&turn).await {
            warn!(error = %e, "Failed to record chat history");
            self.events.publish(DomainEvent::ErrorOccurred {
                context: "history.append".into(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Compose the stack for `input` and run the state machine to completion.
    pub(crate) async fn run_loop(
        &self,
        input: &TurnInput,
        history: &[HistoryMessage],
        sink: &EventSink,
        request_id: &str,
    ) -> Result<LoopOutcome, Error> {
        let composer = ContextComposer::new(
            self.store.clone(),
            RelevanceFilter::new(self.embedder.clone(), self.compose_threshold),
        );
        let composed = composer.compose(input, history).await?;
        debug!(request_id, layers = ?composed.layers, "Context composed");

        let directive = system_directive(&self.base_prompt, &self.dispatcher.registry().definitions());
        let ctx = ToolContext {
            request_id: request_id.to_string(),
            storage: self.store.backend().clone(),
            embedder: self.embedder.clone(),
        };

        let mut stack = composed.stack;
        let mut execution_log = Vec::new();
        let mut current: Option<(IterationLog, Instant)> = None;
        let mut iteration = 0;
        let mut state = LoopState::AwaitModel;

        let answer = loop {
            state = match state {
                LoopState::AwaitModel => {
                    if iteration >= self.max_iterations {
                        warn!(request_id, iterations = iteration, "Max iterations reached");
                        break Answer::NoResponse;
                    }
                    iteration += 1;

                    let trimmed = trim_to_budget(&mut stack, self.context_budget);
                    let started = Instant::now();
                    let raw = self.model.call(&directive, &stack, &self.settings).await?;
                    debug!(
                        request_id,
                        iteration,
                        output_chars = raw.chars().count(),
                        trimmed,
                        "Model replied"
                    );

                    current = Some((
                        IterationLog {
                            iteration,
                            output_chars: raw.chars().count(),
                            think_chars: 0,
                            tools: Vec::new(),
                            duration_ms: 0,
                        },
                        started,
                    ));
                    LoopState::Parse(raw)
                }

                LoopState::Parse(raw) => {
                    let parsed = ParsedOutput::parse(&raw);
                    for thought in parsed.thoughts() {
                        sink.emit(AgentStreamEvent::Thought {
                            iteration,
                            content: thought.to_string(),
                        });
                    }
                    if let Some((entry, _)) = current.as_mut() {
                        entry.think_chars = parsed.think_chars();
                    }

                    let jobs = parsed.tool_jobs();
                    if jobs.is_empty() {
                        LoopState::Done(Answer::from_text(parsed.answer_text()))
                    } else {
                        stack.push(ChatMessage::assistant(parsed.cleaned()));
                        LoopState::DispatchTools(jobs)
                    }
                }

                LoopState::DispatchTools(jobs) => {
                    for job in &jobs {
                        sink.emit(AgentStreamEvent::ToolCall {
                            iteration,
                            name: job.name.clone(),
                            parameter: job.parameter.clone(),
                        });
                    }

                    let outcomes = self.dispatcher.dispatch(&jobs, &ctx).await;
                    for (job, outcome) in jobs.iter().zip(&outcomes) {
                        sink.emit(AgentStreamEvent::ToolResult {
                            iteration,
                            name: job.name.clone(),
                            output: render(&job.name, outcome),
                            success: !outcome.is_error(),
                        });
                    }
                    stack.push(ChatMessage::user(render_all(&jobs, &outcomes)));

                    if let Some((entry, _)) = current.as_mut() {
                        entry.tools = jobs.iter().map(|j| j.name.clone()).collect();
                    }
                    close_iteration(&mut current, &mut execution_log);
                    LoopState::AwaitModel
                }

                LoopState::Done(answer) => break answer,
            };
        };
        close_iteration(&mut current, &mut execution_log);

        info!(
            request_id,
            iterations = iteration,
            answered = answer.is_response(),
            "Loop finished"
        );

        Ok(LoopOutcome {
            answer,
            execution_log,
            active_skills: composed.active_skills,
            iterations: iteration,
            subtasks: Vec::new(),
        })
    }
}

fn close_iteration(current: &mut Option<(IterationLog, Instant)>, log: &mut Vec<IterationLog>) {
    if let Some((mut entry, started)) = current.take() {
        entry.duration_ms = started.elapsed().as_millis() as u64;
        log.push(entry);
    }
}
