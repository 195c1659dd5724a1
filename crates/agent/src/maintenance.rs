//! Post-response maintenance.
//!
//! After a turn is answered, [`MaintenanceScheduler::schedule`] spawns one
//! background pass on its own task. The pass increments the persisted
//! conversation counter and then runs whichever jobs are due:
//!
//! | Job | Due when |
//! |-----|----------|
//! | session summary | counter is a multiple of `summary_every` |
//! | profile extraction | counter is a multiple of `profile_every` |
//! | history condensation | retained history exceeds `condense_over` |
//! | skill evaluation | counter is a multiple of `skill_eval_every` and skills were active |
//!
//! A cadence of 0 disables its job.
//!
//! Each job has its own failure boundary. Failures are logged, published on
//! the event bus and recorded in the [`MaintenanceReport`] returned through
//! the task's `JoinHandle`; they never reach the user.

use std::sync::Arc;

use chrono::Utc;
use mindloop_config::MaintenanceConfig;
use mindloop_core::error::Error;
use mindloop_core::event::{DomainEvent, EventBus};
use mindloop_core::memory::{HistoryMessage, MAX_NARRATIVE_CHARS};
use mindloop_core::message::{ChatMessage, Role};
use mindloop_core::provider::{ModelClient, ModelSettings};
use mindloop_core::text::tail_chars;
use mindloop_memory::MemoryStore;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reply::parse_object;
use crate::skills::{apply_evaluation, parse_evaluation, prune};

/// Messages fed to the session summary.
pub const SUMMARY_WINDOW: usize = 10;

/// Messages fed to profile extraction.
pub const PROFILE_WINDOW: usize = 6;

/// Messages fed to skill evaluation.
pub const EVAL_WINDOW: usize = 10;

const MAINTENANCE_SYSTEM: &str =
    "You maintain the long-term memory of an assistant. Follow the output format exactly.";

/// Cadences and thresholds for the background pass. A zero cadence never fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSettings {
    pub summary_every: u64,
    pub profile_every: u64,
    pub skill_eval_every: u64,
    pub condense_over: usize,
    pub condense_keep: usize,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            summary_every: 3,
            profile_every: 5,
            skill_eval_every: 10,
            condense_over: 40,
            condense_keep: 30,
        }
    }
}

fn is_due(count: u64, every: u64) -> bool {
    count.checked_rem(every) == Some(0)
}

impl From<&MaintenanceConfig> for MaintenanceSettings {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            summary_every: config.summary_every,
            profile_every: config.profile_every,
            skill_eval_every: config.skill_eval_every,
            condense_over: config.condense_over,
            condense_keep: config.condense_keep,
        }
    }
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobStatus {
    Skipped,
    Ran,
    Failed(String),
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Outcome of one background pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Counter value after this pass's increment (0 if the increment failed)
    pub conversation_count: u64,
    pub summary: JobStatus,
    pub profile: JobStatus,
    pub condensation: JobStatus,
    pub skills: JobStatus,
}

impl MaintenanceReport {
    fn skipped() -> Self {
        Self {
            conversation_count: 0,
            summary: JobStatus::Skipped,
            profile: JobStatus::Skipped,
            condensation: JobStatus::Skipped,
            skills: JobStatus::Skipped,
        }
    }
}

/// Queues background maintenance after a response.
#[derive(Clone)]
pub struct MaintenanceScheduler {
    store: MemoryStore,
    model: Arc<dyn ModelClient>,
    settings: ModelSettings,
    cadence: MaintenanceSettings,
    events: Option<Arc<EventBus>>,
}

impl MaintenanceScheduler {
    pub fn new(
        store: MemoryStore,
        model: Arc<dyn ModelClient>,
        settings: ModelSettings,
        cadence: MaintenanceSettings,
    ) -> Self {
        Self {
            store,
            model,
            settings: settings.precise(),
            cadence,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawn one pass. The handle is the pass's error channel; dropping it
    /// detaches the task.
    pub fn schedule(&self, active_skills: Vec<String>) -> JoinHandle<MaintenanceReport> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_pass(&active_skills).await })
    }

    /// Run one pass inline.
    pub async fn run_pass(&self, active_skills: &[String]) -> MaintenanceReport {
        let mut report = MaintenanceReport::skipped();

        let count = match self.store.increment_conversation_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Maintenance: counter update failed, skipping pass");
                self.publish_error("maintenance.counter", &e.to_string());
                return report;
            }
        };
        report.conversation_count = count;
        debug!(count, "Maintenance pass started");

        if is_due(count, self.cadence.summary_every) {
            report.summary = self.finish("summary", self.summarize_session().await);
        }
        if is_due(count, self.cadence.profile_every) {
            report.profile = self.finish("profile", self.extract_profile().await);
        }
        report.condensation = match self.condense_history().await {
            Ok(true) => self.finish("condensation", Ok(())),
            Ok(false) => JobStatus::Skipped,
            Err(e) => self.finish("condensation", Err(e)),
        };
        if is_due(count, self.cadence.skill_eval_every) && !active_skills.is_empty() {
            report.skills = self.finish("skills", self.evaluate_skills(active_skills).await);
        }

        info!(
            count,
            summary = ?report.summary,
            profile = ?report.profile,
            condensation = ?report.condensation,
            skills = ?report.skills,
            "Maintenance pass finished"
        );
        report
    }

    fn finish(&self, job: &str, result: Result<(), Error>) -> JobStatus {
        let status = match result {
            Ok(()) => JobStatus::Ran,
            Err(e) => {
                warn!(job, error = %e, "Maintenance job failed");
                self.publish_error(&format!("maintenance.{job}"), &e.to_string());
                JobStatus::Failed(e.to_string())
            }
        };
        if let Some(events) = &self.events {
            events.publish(DomainEvent::MaintenanceJobFinished {
                job: job.to_string(),
                success: !status.is_failed(),
                timestamp: Utc::now(),
            });
        }
        status
    }

    fn publish_error(&self, context: &str, message: &str) {
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ErrorOccurred {
                context: context.to_string(),
                error_message: message.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn ask(&self, prompt: String) -> Result<String, Error> {
        let reply = self
            .model
            .call(MAINTENANCE_SYSTEM, &[ChatMessage::user(prompt)], &self.settings)
            .await?;
        Ok(reply.trim().to_string())
    }

    async fn summarize_session(&self) -> Result<(), Error> {
        let history = self.store.chat_history().await?;
        if history.is_empty() {
            return Ok(());
        }
        let prompt = format!(
            "Summarize this conversation in 3 to 5 short bullet points. \
             Capture decisions, facts and open questions. Reply with the bullets only.\n\n{}",
            transcript(last_n(&history, SUMMARY_WINDOW))
        );
        let summary = self.ask(prompt).await?;
        if summary.is_empty() {
            return Err(Error::Internal("model returned an empty summary".into()));
        }
        let key = self.store.add_session_summary(Utc::now(), &summary).await?;
        debug!(key = %key, "Session summary stored");
        Ok(())
    }

    async fn extract_profile(&self) -> Result<(), Error> {
        let history = self.store.chat_history().await?;
        if history.is_empty() {
            return Ok(());
        }
        let profile = self.store.profile().await?;
        let prompt = format!(
            "Current user profile (JSON):\n{}\n\nRecent conversation:\n{}\n\n\
             Return a JSON object containing only NEW or CHANGED facts about the user \
             (name, preferences, projects, tools they use). Return {{}} if there are none.",
            Value::Object(profile),
            transcript(last_n(&history, PROFILE_WINDOW))
        );
        let reply = self.ask(prompt).await?;
        let facts: Map<String, Value> = parse_object(&reply)
            .ok_or_else(|| Error::Internal("profile reply was not a JSON object".into()))?;
        if facts.is_empty() {
            return Ok(());
        }
        let merged = self.store.merge_profile(facts).await?;
        debug!(count = merged, "Profile facts merged");
        Ok(())
    }

    /// Returns whether condensation was due.
    async fn condense_history(&self) -> Result<bool, Error> {
        let history = self.store.chat_history().await?;
        if history.len() <= self.cadence.condense_over {
            return Ok(false);
        }
        let split = history.len() - self.cadence.condense_keep.min(history.len());
        let (old, recent) = history.split_at(split);
        let existing = self.store.condensed_narrative().await?;

        let narrative = if self.model.is_available() {
            match self.condense_with_model(&existing, old).await {
                Ok(text) if !text.is_empty() => text,
                Ok(_) => {
                    warn!("Condensation returned nothing, using raw fallback");
                    condense_fallback(&existing, old)
                }
                Err(e) => {
                    warn!(error = %e, "Condensation failed, using raw fallback");
                    condense_fallback(&existing, old)
                }
            }
        } else {
            condense_fallback(&existing, old)
        };

        self.store.set_condensed_narrative(&narrative).await?;
        self.store.set_chat_history(recent.to_vec()).await?;
        info!(condensed = old.len(), kept = recent.len(), "History condensed");
        Ok(true)
    }

    async fn condense_with_model(
        &self,
        existing: &str,
        old: &[HistoryMessage],
    ) -> Result<String, Error> {
        let prompt = format!(
            "Rewrite the earlier narrative and the conversation below into one dense narrative \
             of what has happened so far. Keep names, numbers and decisions. \
             Stay under {MAX_NARRATIVE_CHARS} characters.\n\n\
             Earlier narrative:\n{}\n\nConversation:\n{}",
            if existing.is_empty() { "(none)" } else { existing },
            transcript(old)
        );
        self.ask(prompt).await
    }

    async fn evaluate_skills(&self, active: &[String]) -> Result<(), Error> {
        let mut skills = self.store.skills().await?;
        let evaluated: Vec<_> = skills
            .iter()
            .filter(|s| active.contains(&s.name))
            .map(|s| format!("- {}: {}", s.name, s.instruction))
            .collect();
        if evaluated.is_empty() {
            return Ok(());
        }

        let history = self.store.chat_history().await?;
        let prompt = format!(
            "These skills were applied in the conversation below:\n{}\n\nConversation:\n{}\n\n\
             Rate how much each skill helped, from 0 to 100. \
             Reply with a JSON object mapping skill name to score.",
            evaluated.join("\n"),
            transcript(last_n(&history, EVAL_WINDOW))
        );
        let reply = self.ask(prompt).await?;
        let scores = parse_evaluation(&reply)
            .ok_or_else(|| Error::Internal("skill evaluation reply had no scores".into()))?;

        let now = Utc::now();
        for skill in skills.iter_mut().filter(|s| active.contains(&s.name)) {
            if let Some(eval) = scores.get(&skill.name) {
                apply_evaluation(skill, *eval, now);
            }
        }
        let pruned = prune(&mut skills, now);
        if !pruned.is_empty() {
            info!(pruned = ?pruned, "Pruned skills");
        }
        self.store.set_skills(&skills).await?;
        Ok(())
    }
}

/// Non-summarized condensation: earlier narrative plus raw text, keeping
/// the most recent characters.
pub fn condense_fallback(existing: &str, old: &[HistoryMessage]) -> String {
    let combined = if existing.trim().is_empty() {
        transcript(old)
    } else {
        format!("{}\n{}", existing.trim(), transcript(old))
    };
    tail_chars(&combined, MAX_NARRATIVE_CHARS).to_string()
}

fn last_n(history: &[HistoryMessage], n: usize) -> &[HistoryMessage] {
    &history[history.len().saturating_sub(n)..]
}

fn transcript(messages: &[HistoryMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{speaker}: {}", m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{SequentialMockModel, memory_store};
    use chrono::Duration;
    use mindloop_core::memory::{Skill, is_session_key};

    fn history(n: usize) -> Vec<HistoryMessage> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                HistoryMessage::new(role, format!("message {i}"))
            })
            .collect()
    }

    fn scheduler(store: &MemoryStore, model: Arc<SequentialMockModel>) -> MaintenanceScheduler {
        MaintenanceScheduler::new(
            store.clone(),
            model,
            ModelSettings::new("mock"),
            MaintenanceSettings::default(),
        )
    }

    async fn set_count(store: &MemoryStore, count: u64) {
        for _ in 0..count {
            store.increment_conversation_count().await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_pass_runs_nothing() {
        let store = memory_store();
        store.append_history(&history(2)).await.unwrap();
        let model = Arc::new(SequentialMockModel::new(vec![]));

        let report = scheduler(&store, model.clone()).run_pass(&[]).await;
        assert_eq!(report.conversation_count, 1);
        assert_eq!(report.summary, JobStatus::Skipped);
        assert_eq!(report.profile, JobStatus::Skipped);
        assert_eq!(report.condensation, JobStatus::Skipped);
        assert_eq!(report.skills, JobStatus::Skipped);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn third_pass_stores_session_summary() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        set_count(&store, 2).await;
        let model = Arc::new(SequentialMockModel::new(vec!["- talked about tokens".into()]));

        let report = scheduler(&store, model.clone()).run_pass(&[]).await;
        assert_eq!(report.summary, JobStatus::Ran);

        let entries = store.memory_entries().await.unwrap();
        let (key, value) = entries.iter().next().unwrap();
        assert!(is_session_key(key));
        assert_eq!(value, "- talked about tokens");
        assert!(model.requests()[0].messages[0].content.contains("User: message 0"));
    }

    #[tokio::test]
    async fn fifth_pass_merges_profile_facts() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        set_count(&store, 4).await;
        let model = Arc::new(SequentialMockModel::new(vec![
            "```json\n{\"name\": \"Ada\", \"chain\": \"Solana\"}\n```".into(),
        ]));

        let report = scheduler(&store, model).run_pass(&[]).await;
        assert_eq!(report.profile, JobStatus::Ran);
        let profile = store.profile().await.unwrap();
        assert_eq!(profile["name"], "Ada");
        assert_eq!(profile["chain"], "Solana");
    }

    #[tokio::test]
    async fn unparseable_profile_reply_fails_quietly() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        set_count(&store, 4).await;
        let model = Arc::new(SequentialMockModel::new(vec!["no facts, sorry".into()]));

        let report = scheduler(&store, model).run_pass(&[]).await;
        assert!(report.profile.is_failed());
        assert!(store.profile().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_profile_object_changes_nothing() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        set_count(&store, 4).await;
        let model = Arc::new(SequentialMockModel::new(vec!["{}".into()]));

        let report = scheduler(&store, model).run_pass(&[]).await;
        assert_eq!(report.profile, JobStatus::Ran);
        assert!(store.profile().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn long_history_is_condensed() {
        let store = memory_store();
        store.append_history(&history(42)).await.unwrap();
        let model = Arc::new(SequentialMockModel::new(vec!["A dense narrative.".into()]));

        let report = scheduler(&store, model).run_pass(&[]).await;
        assert_eq!(report.condensation, JobStatus::Ran);
        assert_eq!(store.condensed_narrative().await.unwrap(), "A dense narrative.");
        let kept = store.chat_history().await.unwrap();
        assert_eq!(kept.len(), 30);
        assert_eq!(kept[0].text, "message 12");
    }

    #[tokio::test]
    async fn condensation_falls_back_on_model_failure() {
        let store = memory_store();
        store.set_condensed_narrative("earlier").await.unwrap();
        store.append_history(&history(41)).await.unwrap();
        // No scripted replies: every call fails
        let model = Arc::new(SequentialMockModel::new(vec![]));

        let report = scheduler(&store, model).run_pass(&[]).await;
        assert_eq!(report.condensation, JobStatus::Ran);
        let narrative = store.condensed_narrative().await.unwrap();
        assert!(narrative.starts_with("earlier\nUser: message 0"));
        assert!(narrative.ends_with("User: message 10"));
        assert_eq!(store.chat_history().await.unwrap().len(), 30);
    }

    #[test]
    fn fallback_keeps_most_recent_tail() {
        let old = vec![HistoryMessage::new(Role::User, "z".repeat(5000))];
        let text = condense_fallback("earlier", &old);
        assert_eq!(text.chars().count(), MAX_NARRATIVE_CHARS);
        assert!(text.ends_with('z'));
        assert!(!text.contains("earlier"));
    }

    #[tokio::test]
    async fn skill_evaluation_scores_and_prunes() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        let mut failing = Skill::new("verbose", "Explain everything");
        failing.score = 12;
        failing.eval_count = 1;
        let mut stale = Skill::new("stale", "Never used");
        stale.learned_at = Utc::now() - Duration::days(40);
        store
            .set_skills(&[Skill::new("concise", "Be brief"), failing, stale])
            .await
            .unwrap();
        set_count(&store, 9).await;

        // Tick 10 also extracts the profile, which runs first
        let model = Arc::new(SequentialMockModel::new(vec![
            "{}".into(),
            r#"{"concise": 90, "verbose": 0}"#.into(),
        ]));
        let active = vec!["concise".to_string(), "verbose".to_string()];
        let report = scheduler(&store, model.clone()).run_pass(&active).await;

        assert_eq!(report.conversation_count, 10);
        assert_eq!(report.skills, JobStatus::Ran);
        assert_eq!(report.profile, JobStatus::Ran);
        let skills = store.skills().await.unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "concise");
        assert_eq!(skills[0].score, 66);
        assert_eq!(skills[0].eval_count, 1);
    }

    #[tokio::test]
    async fn zero_cadence_disables_job() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        set_count(&store, 2).await;
        let model = Arc::new(SequentialMockModel::new(vec![]));
        let settings = MaintenanceSettings {
            summary_every: 0,
            profile_every: 0,
            skill_eval_every: 0,
            ..MaintenanceSettings::default()
        };

        let report = MaintenanceScheduler::new(store, model.clone(), ModelSettings::new("mock"), settings)
            .run_pass(&["concise".to_string()])
            .await;
        assert_eq!(report.conversation_count, 3);
        assert_eq!(report.summary, JobStatus::Skipped);
        assert_eq!(report.profile, JobStatus::Skipped);
        assert_eq!(report.skills, JobStatus::Skipped);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn skill_evaluation_needs_active_skills() {
        let store = memory_store();
        store.set_skills(&[Skill::new("concise", "Be brief")]).await.unwrap();
        set_count(&store, 9).await;
        let model = Arc::new(SequentialMockModel::new(vec![]));

        let report = scheduler(&store, model).run_pass(&[]).await;
        assert_eq!(report.skills, JobStatus::Skipped);
    }

    #[tokio::test]
    async fn jobs_fail_independently_on_the_same_tick() {
        let store = memory_store();
        store.append_history(&history(4)).await.unwrap();
        store.set_skills(&[Skill::new("concise", "Be brief")]).await.unwrap();
        set_count(&store, 29).await;

        // Tick 30: summary, profile and skills all due. The summary call fails.
        let model = Arc::new(SequentialMockModel::with_results(vec![
            Err("down".into()),
            Ok(r#"{"likes": "tea"}"#.into()),
            Ok(r#"{"concise": 80}"#.into()),
        ]));
        let report = scheduler(&store, model.clone())
            .run_pass(&["concise".to_string()])
            .await;

        assert_eq!(report.conversation_count, 30);
        assert!(report.summary.is_failed());
        assert_eq!(report.profile, JobStatus::Ran);
        assert_eq!(report.skills, JobStatus::Ran);
        assert_eq!(model.call_count(), 3);
        assert_eq!(store.profile().await.unwrap()["likes"], "tea");
        assert_eq!(store.skills().await.unwrap()[0].score, 62);
    }

    #[tokio::test]
    async fn scheduled_pass_reports_through_handle() {
        let store = memory_store();
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        set_count(&store, 2).await;
        store.append_history(&history(2)).await.unwrap();
        let model = Arc::new(SequentialMockModel::new(vec!["- hi".into()]));

        let handle = scheduler(&store, model)
            .with_events(events)
            .schedule(vec![]);
        let report = handle.await.unwrap();
        assert_eq!(report.summary, JobStatus::Ran);

        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::MaintenanceJobFinished { job, success, .. } => {
                assert_eq!(job, "summary");
                assert!(*success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
