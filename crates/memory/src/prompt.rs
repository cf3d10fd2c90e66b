//! Builds the memory-writer prompt: the message segment plus the user's
//! current active memories, rendered compactly per level — titled sections
//! assembled up to a character budget, with a truncation marker rather
//! than a hard cut mid-section where possible.

use sa_domain::entities::{MemoryItem, MemoryModule};

const SYSTEM_PROMPT: &str = "You distill durable facts about a user from a conversation segment. \
Respond with a JSON array of operations only, no prose. Each operation has the shape \
{\"op\": \"add|update|delete|touch\", \"module\": \"identity|preferences|constraints|projects|relationships|environment|recent_context\", \
\"key\": \"snake_case_key\", \"value\": \"...\", \"confidence\": 0.0-1.0}. \
Only emit an op when the segment actually supports it; when nothing changed, return an empty array. \
Never include secrets, passwords, or API keys as a value.";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

fn module_label(module: MemoryModule) -> &'static str {
    match module {
        MemoryModule::Identity => "identity",
        MemoryModule::Preferences => "preferences",
        MemoryModule::Constraints => "constraints",
        MemoryModule::Projects => "projects",
        MemoryModule::Relationships => "relationships",
        MemoryModule::Environment => "environment",
        MemoryModule::RecentContext => "recent_context",
    }
}

/// Render the user's current active memories as a compact per-level block,
/// truncated to `max_chars`.
pub fn render_active_memories(items: &[MemoryItem], max_chars: usize) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut by_level: std::collections::BTreeMap<u8, Vec<&MemoryItem>> = Default::default();
    for item in items {
        by_level.entry(item.level).or_default().push(item);
    }

    let mut output = String::new();
    for (level, level_items) in by_level {
        let section_header = format!("### L{level}\n");
        if output.len() + section_header.len() > max_chars {
            output.push_str("[MEMORIES_TRUNCATED]\n");
            return output;
        }
        output.push_str(&section_header);
        for item in level_items {
            let line = format!("- [{}] {}: {}\n", module_label(item.module), item.key, item.value);
            if output.len() + line.len() > max_chars {
                output.push_str("[MEMORIES_TRUNCATED]\n");
                return output;
            }
            output.push_str(&line);
        }
    }
    output
}

/// Build the user-turn content: the raw segment plus the active-memory block.
pub fn build_segment_prompt(segment: &str, active_memories: &str) -> String {
    if active_memories.is_empty() {
        format!("Conversation segment:\n{segment}")
    } else {
        format!("Current memories:\n{active_memories}\nConversation segment:\n{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item(level: u8, module: MemoryModule, key: &str, value: &str) -> MemoryItem {
        MemoryItem {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            level,
            module,
            key: key.into(),
            value: value.into(),
            confidence: 0.9,
            pinned: false,
            archived: false,
            context_id: None,
            created_at: chrono::Utc::now(),
            last_seen_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_items_render_empty_string() {
        assert_eq!(render_active_memories(&[], 1000), "");
    }

    #[test]
    fn groups_by_level() {
        let items = vec![
            item(0, MemoryModule::Identity, "name", "Ada"),
            item(1, MemoryModule::Preferences, "fav_color", "blue"),
        ];
        let rendered = render_active_memories(&items, 1000);
        assert!(rendered.contains("### L0"));
        assert!(rendered.contains("### L1"));
        assert!(rendered.contains("Ada"));
    }

    #[test]
    fn truncates_past_max_chars() {
        let items = vec![item(0, MemoryModule::Identity, "name", &"x".repeat(200))];
        let rendered = render_active_memories(&items, 30);
        assert!(rendered.contains("[MEMORIES_TRUNCATED]"));
    }

    #[test]
    fn segment_prompt_includes_memories_when_present() {
        let prompt = build_segment_prompt("hello", "### L0\n- [identity] name: Ada\n");
        assert!(prompt.contains("Current memories"));
        assert!(prompt.contains("hello"));
    }

    #[test]
    fn segment_prompt_omits_memories_section_when_empty() {
        let prompt = build_segment_prompt("hello", "");
        assert!(!prompt.contains("Current memories"));
    }
}
