//! Token-Jaccard similarity and the requirements/plan keyword checks used by
//! the note/rationale/action protocol.

use std::collections::HashSet;

/// Lower-cased alphanumeric tokens of length > 2, used as the similarity
/// unit throughout the note protocol.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| t.len() > 2)
        .collect()
}

/// Token-Jaccard similarity between two strings, in `[0.0, 1.0]`. Two empty
/// token sets are treated as maximally similar (both say nothing).
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

const REQUIREMENTS_KEYWORDS: &[&str] = &[
    "output",
    "criteria",
    "format",
    "deliverable",
    "success",
    "requirement",
    "requirements",
    "expected",
    "must",
];

/// A requirements note must name an output/criteria keyword, not merely
/// restate the task.
pub fn looks_like_requirements_note(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    REQUIREMENTS_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn is_step_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty() && trimmed[digits.len()..].trim_start().starts_with(['.', ')']))
        || trimmed.starts_with('-')
        || trimmed.starts_with('*')
}

/// A plan note must be numbered steps (`1.`, `1)`, or a leading dash list).
pub fn looks_like_plan_note(content: &str) -> bool {
    content.lines().filter(|l| !l.trim().is_empty()).any(is_step_line)
}

pub fn plan_step_count(content: &str) -> usize {
    content.lines().filter(|l| is_step_line(l)).count()
}

const COORDINATOR_PLAN_MENTIONS: &[&str] = &[
    "queue_op",
    "spawn_subagent",
    "deliver_subagent_output",
    "format",
    "success",
    "context",
];

/// Coordinator plans carry more obligations than subagent plans: at least
/// five steps, and explicit mentions of the queue/spawn/deliver operations,
/// the expected output format, the success criteria, and what context each
/// subagent gets.
pub fn looks_like_coordinator_plan(content: &str) -> bool {
    if plan_step_count(content) < 5 {
        return false;
    }
    let lower = content.to_ascii_lowercase();
    COORDINATOR_PLAN_MENTIONS.iter().all(|k| lower.contains(k))
}

/// Whether a plan mentions a tool: either the word itself or a dotted
/// `tool.command` identifier.
pub fn mentions_tool(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    if lower.contains("tool") {
        return true;
    }
    lower.split_whitespace().any(|w| {
        w.split_once('.')
            .map(|(a, b)| {
                !a.is_empty()
                    && a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    && b.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
            })
            .unwrap_or(false)
    })
}

/// An artifact note is exactly one sentence: no line breaks, and no
/// sentence-ending punctuation except possibly at the very end.
pub fn looks_like_artifact_note(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed.contains('\n') {
        return false;
    }
    let bytes = trimmed.as_bytes();
    !trimmed
        .char_indices()
        .any(|(i, c)| matches!(c, '.' | '!' | '?') && i + 1 < bytes.len() && bytes[i + 1] == b' ')
}

const TOOL_HINT_WORDS: &[&str] = &["tool", "call", "fetch", "lookup", "query", "search", "run"];

/// Whether the task text hints that tool usage will be needed, used to
/// decide whether a subagent's plan note must mention a tool.
pub fn task_hints_at_tools(task: &str) -> bool {
    let lower = task.to_ascii_lowercase();
    TOOL_HINT_WORDS.iter().any(|k| lower.contains(k))
}

/// Whether a `send_message` body reads as a final, direct answer rather than
/// a short clarifying question — the case that requires validation before
/// it reaches the user.
pub fn resembles_direct_answer(message: &str) -> bool {
    let trimmed = message.trim();
    let word_count = trimmed.split_whitespace().count();
    !(trimmed.ends_with('?') && word_count < 15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_maximally_similar() {
        assert_eq!(jaccard_similarity("fetch the weather report", "fetch the weather report"), 1.0);
    }

    #[test]
    fn disjoint_strings_have_zero_similarity() {
        assert_eq!(jaccard_similarity("aaa bbb ccc", "xxx yyy zzz"), 0.0);
    }

    #[test]
    fn requirements_note_needs_a_keyword() {
        assert!(looks_like_requirements_note("Output must be a JSON summary meeting the success criteria."));
        assert!(!looks_like_requirements_note("The user wants the weather."));
    }

    #[test]
    fn plan_note_needs_numbered_or_bulleted_steps() {
        assert!(looks_like_plan_note("1. call weather.get\n2. summarise"));
        assert!(looks_like_plan_note("- call weather.get\n- summarise"));
        assert!(!looks_like_plan_note("call the tool then summarise"));
    }

    #[test]
    fn task_hints_detects_tool_verbs() {
        assert!(task_hints_at_tools("look up the current weather"));
        assert!(!task_hints_at_tools("say hello"));
    }

    #[test]
    fn coordinator_plan_needs_five_steps_and_mentions() {
        let plan = "1. queue_op push the open questions\n\
                    2. spawn_subagent for the lookup with full context\n\
                    3. review the result against the success criteria\n\
                    4. deliver_subagent_output to the user\n\
                    5. confirm the output format matches the request";
        assert!(looks_like_coordinator_plan(plan));
        assert!(!looks_like_coordinator_plan("1. do it\n2. done"));
    }

    #[test]
    fn tool_mention_accepts_dotted_identifier() {
        assert!(mentions_tool("1. call weather.get for Bremen"));
        assert!(mentions_tool("use the search tool"));
        assert!(!mentions_tool("1. summarise the findings"));
    }

    #[test]
    fn artifact_note_must_be_one_sentence() {
        assert!(looks_like_artifact_note("Next I will invoke the weather tool for Bremen."));
        assert!(!looks_like_artifact_note("First this. Then that."));
        assert!(!looks_like_artifact_note("line one\nline two"));
    }

    #[test]
    fn short_question_is_not_a_direct_answer() {
        assert!(!resembles_direct_answer("Which city did you mean?"));
    }

    #[test]
    fn long_statement_resembles_a_direct_answer() {
        assert!(resembles_direct_answer("The forecast for Bremen tomorrow is partly cloudy with a high of 18C."));
    }
}
