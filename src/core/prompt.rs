//! C9: numbered-source context assembly bounded by a character budget
//! (spec §4.9).
//!
//! Grounded on `original_source/src/providers/openai.py`'s system/user message
//! construction, generalized from "top 3 contexts" to "as many as fit the
//! character budget" per spec.

use crate::core::types::RetrievedPassage;

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that answers questions based on \
the provided context. If the context doesn't contain relevant information, say so clearly. \
Be concise, factual, and state your uncertainty when the context is insufficient.";

const ELLIPSIS: &str = "...";

/// A 2-message chat structure: (1) fixed system instruction, (2) user
/// message containing the numbered context block and the question.
#[derive(Debug, Clone)]
pub struct PromptMessages {
    pub system: String,
    pub user: String,
}

/// Concatenate passages with numbered source markers until `max_chars` is
/// reached; truncates the last included passage with an ellipsis rather than
/// omitting it outright when it would otherwise overflow the budget exactly
/// at a boundary.
pub fn assemble(question: &str, passages: &[RetrievedPassage], max_chars: usize) -> PromptMessages {
    let mut context = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let marker = format!("[{}] ", i + 1);
        let remaining = max_chars.saturating_sub(context.len());
        if remaining == 0 {
            break;
        }

        let budget_for_entry = remaining.saturating_sub(marker.len());
        if budget_for_entry == 0 {
            break;
        }

        let content = &passage.content;
        if marker.len() + content.len() <= remaining {
            context.push_str(&marker);
            context.push_str(content);
            context.push('\n');
        } else {
            let truncate_to = budget_for_entry.saturating_sub(ELLIPSIS.len());
            let cut = floor_char_boundary(content, truncate_to);
            context.push_str(&marker);
            context.push_str(&content[..cut]);
            context.push_str(ELLIPSIS);
            break;
        }
    }

    let user = format!("Context:\n{context}\nQuestion: {question}\n\nAnswer:");

    PromptMessages {
        system: SYSTEM_INSTRUCTION.to_string(),
        user,
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(content: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk_id: "c".to_string(),
            content: content.to_string(),
            title: None,
            source: "test".to_string(),
            url: None,
            fused_score: 0.0,
            lexical_score: None,
            semantic_score: None,
            rerank_score: None,
        }
    }

    #[test]
    fn assembles_numbered_sources_and_question() {
        let passages = vec![passage("BM25 is lexical."), passage("Vectors are dense.")];
        let messages = assemble("What is hybrid search?", &passages, 2048);
        assert!(messages.user.contains("[1] BM25 is lexical."));
        assert!(messages.user.contains("[2] Vectors are dense."));
        assert!(messages.user.contains("What is hybrid search?"));
    }

    #[test]
    fn system_instruction_mentions_uncertainty_and_context_only() {
        let messages = assemble("q", &[], 2048);
        assert!(messages.system.to_lowercase().contains("uncertain"));
        assert!(messages.system.to_lowercase().contains("context"));
    }

    #[test]
    fn truncates_with_ellipsis_when_budget_exceeded() {
        let long_passage = passage(&"word ".repeat(200));
        let messages = assemble("q", &[long_passage], 50);
        assert!(messages.user.contains(ELLIPSIS));
    }

    #[test]
    fn empty_passages_yields_empty_context_block() {
        let messages = assemble("q", &[], 2048);
        assert!(messages.user.contains("Context:\n"));
    }

    #[test]
    fn respects_character_budget_across_multiple_passages() {
        let passages: Vec<_> = (0..50).map(|i| passage(&format!("passage number {i} "))).collect();
        let messages = assemble("q", &passages, 100);
        // The context block itself (excluding question/system boilerplate) must
        // never wildly exceed the budget.
        let context_start = messages.user.find("Context:\n").unwrap() + "Context:\n".len();
        let context_end = messages.user.find("\nQuestion:").unwrap();
        assert!(context_end - context_start <= 100 + 10);
    }
}
