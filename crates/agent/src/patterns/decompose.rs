//! Subtask orchestration for multi-phase requests.
//!
//! ```text
//! "Compare A and B, then check A's wallet"
//!       │
//!       ▼
//!   propose ──► [s1: compare A and B] ──► [s2: check A's wallet (uses s1)]
//!                        │                          │
//!                        └──── run_loop ────────────┘
//!                                   │
//!                                   ▼
//!                               synthesize
//! ```
//!
//! Each subtask is a full, independent run of the reasoning loop. Outputs of
//! the subtasks a step depends on are appended to its input. A proposal that
//! does not parse or does not validate means the request runs as one turn.

use std::time::Instant;

use mindloop_core::error::Error;
use mindloop_core::memory::HistoryMessage;
use mindloop_core::message::ChatMessage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::TurnInput;
use crate::loop_runner::{AgentLoop, Answer, IterationLog, LoopOutcome};
use crate::protocol::ParsedOutput;
use crate::reply::parse_object;
use crate::stream_event::{AgentStreamEvent, EventSink};

pub const MIN_SUBTASKS: usize = 2;
pub const MAX_SUBTASKS: usize = 4;

/// Inputs shorter than this never decompose.
const MIN_CHARS: usize = 25;

/// Without a connector, this many characters plus three verbs still counts.
const LONG_INPUT_CHARS: usize = 160;

const CONNECTORS: &[&str] = &[
    ", then ",
    " and then ",
    "; then ",
    " then ",
    " after that",
    " afterwards",
    " followed by ",
    " finally",
    " next, ",
    "first,",
];

const ACTION_VERBS: &[&str] = &[
    "compare", "check", "find", "analyze", "analyse", "summarize", "list", "explain", "write",
    "calculate", "look up", "search", "review", "create", "translate", "draft", "verify",
    "research", "plan", "evaluate",
];

const PLANNER_SYSTEM: &str = "You split requests into ordered steps. Reply with JSON only.";

/// Heuristic: does this input ask for several distinct phases of work?
pub fn is_multi_phase(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.chars().count() < MIN_CHARS {
        return false;
    }
    let has_connector = CONNECTORS.iter().any(|c| lower.contains(c));
    let verbs = ACTION_VERBS
        .iter()
        .filter(|verb| contains_word(&lower, verb))
        .count();

    (has_connector && verbs >= 2) || (verbs >= 3 && lower.chars().count() >= LONG_INPUT_CHARS)
}

const INFLECTIONS: &[&str] = &["", "s", "es", "d", "ed", "ing"];

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(at, _)| {
        let starts_word = haystack[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let rest = &haystack[at + word.len()..];
        let suffix_len = rest.find(|c: char| !c.is_alphanumeric()).unwrap_or(rest.len());
        starts_word && INFLECTIONS.contains(&&rest[..suffix_len])
    })
}

/// One proposed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Deserialize)]
struct Plan {
    subtasks: Vec<Subtask>,
}

/// Parse and validate a proposal. Ids must be unique and non-empty, and a
/// subtask may only depend on subtasks listed before it.
pub fn parse_plan(reply: &str) -> Option<Vec<Subtask>> {
    let plan: Plan = parse_object(reply)?;
    let subtasks = plan.subtasks;
    if !(MIN_SUBTASKS..=MAX_SUBTASKS).contains(&subtasks.len()) {
        return None;
    }

    let mut seen: Vec<&str> = Vec::with_capacity(subtasks.len());
    for subtask in &subtasks {
        let id = subtask.id.trim();
        if id.is_empty() || subtask.task.trim().is_empty() || seen.contains(&id) {
            return None;
        }
        if !subtask.depends_on.iter().all(|dep| seen.contains(&dep.trim())) {
            return None;
        }
        seen.push(id);
    }
    Some(subtasks)
}

/// How one subtask resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtaskResult {
    pub id: String,
    pub task: String,
    pub answer: Answer,
    pub iterations: usize,
}

impl SubtaskResult {
    fn answer_or_placeholder(&self) -> &str {
        self.answer.text().unwrap_or("(no result)")
    }
}

/// Runs a request as a sequence of subtasks.
pub struct SubtaskOrchestrator<'a> {
    agent: &'a AgentLoop,
}

impl<'a> SubtaskOrchestrator<'a> {
    pub fn new(agent: &'a AgentLoop) -> Self {
        Self { agent }
    }

    /// Ask the model for a decomposition. `Ok(None)` means run as one turn.
    pub async fn propose(&self, message: &str) -> Result<Option<Vec<Subtask>>, Error> {
        let prompt = format!(
            "Request:\n{message}\n\n\
             If this request has several distinct phases, split it into {MIN_SUBTASKS} to \
             {MAX_SUBTASKS} ordered subtasks. Reply with:\n\
             {{\"subtasks\": [{{\"id\": \"s1\", \"task\": \"...\", \"dependsOn\": []}}]}}\n\
             A subtask may depend only on earlier ids. Reply {{\"subtasks\": []}} if it \
             should not be split."
        );
        let reply = self
            .agent
            .model()
            .call(
                PLANNER_SYSTEM,
                &[ChatMessage::user(prompt)],
                &self.agent.settings().precise(),
            )
            .await?;

        let plan = parse_plan(&reply);
        match &plan {
            Some(subtasks) => debug!(count = subtasks.len(), "Decomposition accepted"),
            None => debug!("Decomposition declined or invalid"),
        }
        Ok(plan)
    }

    /// Propose, run each subtask through the loop, then synthesize.
    pub async fn run(
        &self,
        input: &TurnInput,
        history: &[HistoryMessage],
        sink: &EventSink,
        request_id: &str,
    ) -> Result<Option<LoopOutcome>, Error> {
        let Some(subtasks) = self.propose(&input.message).await? else {
            return Ok(None);
        };
        info!(request_id, subtasks = subtasks.len(), "Running decomposed request");

        let mut results: Vec<SubtaskResult> = Vec::with_capacity(subtasks.len());
        let mut execution_log = Vec::new();
        let mut active_skills: Vec<String> = Vec::new();
        let mut iterations = 0;

        for subtask in &subtasks {
            let step_input = TurnInput {
                message: step_message(&input.message, subtask, &results),
                ..input.clone()
            };
            let outcome = self.agent.run_loop(&step_input, history, sink, request_id).await?;

            execution_log.extend(outcome.execution_log.into_iter().map(|mut entry| {
                entry.iteration += iterations;
                entry
            }));
            iterations += outcome.iterations;
            for skill in outcome.active_skills {
                if !active_skills.contains(&skill) {
                    active_skills.push(skill);
                }
            }

            if !outcome.answer.is_response() {
                warn!(request_id, subtask = %subtask.id, "Subtask produced no response");
            }
            sink.emit(AgentStreamEvent::Subtask {
                id: subtask.id.clone(),
                task: subtask.task.clone(),
                answered: outcome.answer.is_response(),
            });
            results.push(SubtaskResult {
                id: subtask.id.clone(),
                task: subtask.task.clone(),
                answer: outcome.answer,
                iterations: outcome.iterations,
            });
        }

        iterations += 1;
        let started = Instant::now();
        let raw = self.synthesize(&input.message, &results).await?;
        let parsed = ParsedOutput::parse(&raw);
        for thought in parsed.thoughts() {
            sink.emit(AgentStreamEvent::Thought {
                iteration: iterations,
                content: thought.to_string(),
            });
        }
        execution_log.push(IterationLog {
            iteration: iterations,
            output_chars: raw.chars().count(),
            think_chars: parsed.think_chars(),
            tools: Vec::new(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        Ok(Some(LoopOutcome {
            answer: Answer::from_text(parsed.answer_text()),
            execution_log,
            active_skills,
            iterations,
            subtasks: results,
        }))
    }

    async fn synthesize(&self, message: &str, results: &[SubtaskResult]) -> Result<String, Error> {
        let mut prompt = format!("Original request:\n{message}\n\nResults of each step:");
        for result in results {
            prompt.push_str(&format!(
                "\n\n[{}] {}\n{}",
                result.id,
                result.task,
                result.answer_or_placeholder()
            ));
        }
        prompt.push_str(
            "\n\nCombine these results into one complete answer to the original request. \
             Do not mention the steps.",
        );

        let reply = self
            .agent
            .model()
            .call(
                self.agent.base_prompt(),
                &[ChatMessage::user(prompt)],
                self.agent.settings(),
            )
            .await?;
        Ok(reply)
    }
}

/// The input for one step: its task, the overall request, and the outputs
/// of the steps it depends on.
fn step_message(original: &str, subtask: &Subtask, done: &[SubtaskResult]) -> String {
    let mut message = format!("{}\n\n[Part of a larger request: {original}]", subtask.task.trim());
    let deps: Vec<_> = done
        .iter()
        .filter(|r| subtask.depends_on.iter().any(|d| d.trim() == r.id.trim()))
        .collect();
    if !deps.is_empty() {
        message.push_str("\n\n[Results from earlier steps]");
        for dep in deps {
            message.push_str(&format!("\n[{}] {}", dep.id, dep.answer_or_placeholder()));
        }
    }
    message
}
