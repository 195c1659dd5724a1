//! `mindloop memory`: inspect and edit the memory store.

use mindloop_core::error::StorageError;
use mindloop_core::memory::{is_session_key, value_text};
use mindloop_memory::MemoryStore;

use super::{load_config, open_store};

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config);
    println!("Memory store: {}", config.memory.store_path().display());
    println!();
    print!("{}", render(&store).await?);
    Ok(())
}

pub async fn forget(key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = open_store(&config);
    if store.remove_memory(key).await? {
        println!("Forgot '{key}'.");
        Ok(())
    } else {
        Err(format!("No memory entry named '{key}'").into())
    }
}

/// Text dump of every region.
pub(crate) async fn render(store: &MemoryStore) -> Result<String, StorageError> {
    let mut out = String::new();

    out.push_str(&format!(
        "Conversations: {}\n",
        store.conversation_count().await?
    ));
    out.push_str(&format!(
        "Chat history:  {} messages\n",
        store.chat_history().await?.len()
    ));

    let narrative = store.condensed_narrative().await?;
    out.push_str("\n[Condensed narrative]\n");
    if narrative.trim().is_empty() {
        out.push_str("  (none)\n");
    } else {
        out.push_str(&format!("  {}\n", narrative.trim()));
    }

    let profile = store.profile().await?;
    out.push_str("\n[Profile]\n");
    if profile.is_empty() {
        out.push_str("  (empty)\n");
    }
    for (key, value) in &profile {
        out.push_str(&format!("  {key}: {}\n", value_text(value)));
    }

    let entries = store.memory_entries().await?;
    let (sessions, manual): (Vec<_>, Vec<_>) =
        entries.iter().partition(|(key, _)| is_session_key(key));

    out.push_str("\n[Session summaries]\n");
    if sessions.is_empty() {
        out.push_str("  (none)\n");
    }
    for (key, value) in sessions {
        out.push_str(&format!("  {key}:\n"));
        for line in value_text(value).lines() {
            out.push_str(&format!("    {line}\n"));
        }
    }

    out.push_str("\n[Saved memories]\n");
    if manual.is_empty() {
        out.push_str("  (none)\n");
    }
    for (key, value) in manual {
        out.push_str(&format!("  {key}: {}\n", value_text(value)));
    }

    let skills = store.skills().await?;
    out.push_str("\n[Skills]\n");
    if skills.is_empty() {
        out.push_str("  (none)\n");
    }
    for skill in &skills {
        out.push_str(&format!(
            "  {} (score {}, used {}x, evaluated {}x): {}\n",
            skill.name, skill.score, skill.usage_count, skill.eval_count, skill.instruction
        ));
    }

    Ok(out)
}
