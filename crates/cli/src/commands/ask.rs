//! `mindloop ask`: one turn through the agent loop.

use std::sync::Arc;

use mindloop_agent::{AgentLoop, AgentStreamEvent, Answer, TurnInput};
use mindloop_config::AppConfig;
use mindloop_core::provider::Embedder;
use mindloop_providers::OpenAiCompatProvider;
use mindloop_tools::builtin_registry;
use tracing::{debug, warn};

use super::{load_config, open_store};

pub async fn run(message: String, show_thoughts: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    MINDLOOP_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add `api_key` to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let embedder: Option<Arc<dyn Embedder>> = if config.embedding.enabled {
        Some(provider.clone() as Arc<dyn Embedder>)
    } else {
        None
    };
    let registry = Arc::new(builtin_registry(config.memory.recall_threshold));
    let agent = AgentLoop::from_config(&config, provider, embedder, open_store(&config), registry);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = describe(&event, show_thoughts) {
                eprintln!("{line}");
            }
        }
    });

    let result = agent.run_with_events(TurnInput::new(message), Some(tx)).await?;
    // The sender is dropped with the request, so the printer drains and ends
    let _ = printer.await;

    match &result.answer {
        Answer::Text(text) => println!("{text}"),
        Answer::NoResponse => {
            eprintln!(
                "  (no response after {} iterations)",
                result.execution_log.len()
            );
        }
    }

    // Let background maintenance finish before the process exits
    if let Some(handle) = result.maintenance {
        match handle.await {
            Ok(report) => debug!(?report, "Maintenance finished"),
            Err(e) => warn!(error = %e, "Maintenance task aborted"),
        }
    }

    Ok(())
}

/// The stderr line for a stream event, if it should be shown.
fn describe(event: &AgentStreamEvent, show_thoughts: bool) -> Option<String> {
    match event {
        AgentStreamEvent::Thought { content, .. } if show_thoughts => {
            Some(format!("  [think] {content}"))
        }
        AgentStreamEvent::Thought { .. } => None,
        AgentStreamEvent::ToolCall {
            name, parameter, ..
        } => {
            if parameter.is_empty() {
                Some(format!("  [tool] {name}"))
            } else {
                Some(format!("  [tool] {name}: {parameter}"))
            }
        }
        AgentStreamEvent::ToolResult { name, success, .. } if !success => {
            Some(format!("  [tool] {name} failed"))
        }
        AgentStreamEvent::ToolResult { .. } => None,
        AgentStreamEvent::Subtask { id, task, answered } => {
            let mark = if *answered { "done" } else { "no result" };
            Some(format!("  [step {id}] {task} ({mark})"))
        }
        AgentStreamEvent::Answer { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thoughts_hidden_unless_requested() {
        let event = AgentStreamEvent::Thought {
            iteration: 1,
            content: "hmm".into(),
        };
        assert_eq!(describe(&event, false), None);
        assert_eq!(describe(&event, true).as_deref(), Some("  [think] hmm"));
    }

    #[test]
    fn tool_calls_always_shown() {
        let event = AgentStreamEvent::ToolCall {
            iteration: 1,
            name: "RECALL".into(),
            parameter: "wallet".into(),
        };
        assert_eq!(describe(&event, false).as_deref(), Some("  [tool] RECALL: wallet"));
    }

    #[test]
    fn only_failed_results_shown() {
        let ok = AgentStreamEvent::ToolResult {
            iteration: 1,
            name: "FORGET".into(),
            output: String::new(),
            success: true,
        };
        let failed = AgentStreamEvent::ToolResult {
            iteration: 1,
            name: "FORGET".into(),
            output: "{\"error\":\"No memory entry named 'x'\"}".into(),
            success: false,
        };
        assert_eq!(describe(&ok, true), None);
        assert_eq!(describe(&failed, true).as_deref(), Some("  [tool] FORGET failed"));
    }
}
