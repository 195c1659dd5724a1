//! Skill scoring and pruning.
//!
//! Scores move by exponential smoothing that favors history:
//! `new = round(old * 0.6 + clamp(eval, 0, 100) * 0.4)`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use mindloop_core::memory::Skill;
use serde_json::{Map, Value};

use crate::reply::{json_array_span, json_object_span};

const HISTORY_WEIGHT: f64 = 0.6;
const EVAL_WEIGHT: f64 = 0.4;

/// Smoothed score after one evaluation.
pub fn update_score(old: u8, eval: f64) -> u8 {
    let eval = if eval.is_finite() { eval.clamp(0.0, 100.0) } else { 0.0 };
    (f64::from(old) * HISTORY_WEIGHT + eval * EVAL_WEIGHT)
        .round()
        .clamp(0.0, 100.0) as u8
}

/// Apply one evaluation to a skill.
pub fn apply_evaluation(skill: &mut Skill, eval: f64, now: DateTime<Utc>) {
    skill.score = update_score(skill.score, eval);
    skill.eval_count += 1;
    skill.last_eval_at = Some(now);
}

/// Whether a skill should be removed.
///
/// Any of: consistently rated poorly, heavily used yet weak, or never used
/// in the 30 days since it was learned.
pub fn should_prune(skill: &Skill, now: DateTime<Utc>) -> bool {
    let failing = skill.score <= 10 && skill.eval_count >= 2;
    let overused_weak = skill.usage_count > 30 && skill.score <= 20;
    let stale = now - skill.learned_at > Duration::days(30) && skill.usage_count == 0;
    failing || overused_weak || stale
}

/// Remove prunable skills. Returns the names removed.
pub fn prune(skills: &mut Vec<Skill>, now: DateTime<Utc>) -> Vec<String> {
    let mut removed = Vec::new();
    skills.retain(|s| {
        let prune = should_prune(s, now);
        if prune {
            removed.push(s.name.clone());
        }
        !prune
    });
    removed
}

/// Parse an evaluation reply into name → score.
///
/// Accepts `{"name": 80}`, `{"name": {"score": 80}}` or
/// `[{"name": "...", "score": 80}]`. Returns `None` when nothing parses.
pub fn parse_evaluation(reply: &str) -> Option<HashMap<String, f64>> {
    let array_first = match (reply.find('['), reply.find('{')) {
        (Some(a), Some(o)) => a < o,
        (Some(_), None) => true,
        _ => false,
    };

    let scores: HashMap<String, f64> = if array_first {
        let items: Vec<Value> = serde_json::from_str(json_array_span(reply)?).ok()?;
        items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                Some((name, score_of(item.get("score")?)?))
            })
            .collect()
    } else {
        let map: Map<String, Value> = serde_json::from_str(json_object_span(reply)?).ok()?;
        map.into_iter()
            .filter_map(|(name, v)| score_of(&v).map(|s| (name, s)))
            .collect()
    };
    (!scores.is_empty()).then_some(scores)
}

fn score_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(o) => o.get("score").and_then(score_of),
        _ => None,
    }
}
