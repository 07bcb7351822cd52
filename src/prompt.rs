//! Prompt assembly for the response agent.
//!
//! The prompt has a fixed layout: instructions, optional conversation
//! history, the retrieved context, then the question. Retrieved text is
//! bounded by a character budget; [`fit_context`] drops the
//! lowest-ranked chunks first and truncates a lone oversized top chunk.

use agentic_rag_core::models::{RetrievedChunk, Turn};

pub const CONTEXT_HEADER: &str = "Context:\n";
pub const QUESTION_HEADER: &str = "\nQuestion:";

const INSTRUCTIONS: &str = "You are a helpful assistant answering questions about the user's \
documents. Answer using only the context below. If the context does not contain the answer, \
say that you could not find it in the documents.";

/// Retrieved chunks that fit the context budget, in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedContext {
    pub items: Vec<RetrievedChunk>,
    /// Lower-ranked chunks left out of the prompt.
    pub dropped: usize,
    /// Whether the single included chunk was cut to fit.
    pub truncated: bool,
}

/// Keep the longest rank-order prefix of `items` whose texts total at most
/// `budget_chars` characters.
///
/// If not even the top chunk fits, it is truncated to the budget on a
/// character boundary and included alone.
pub fn fit_context(items: &[RetrievedChunk], budget_chars: usize) -> FittedContext {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for item in items {
        let len = item.text.chars().count();
        if used + len > budget_chars {
            break;
        }
        used += len;
        kept.push(item.clone());
    }

    if kept.is_empty() {
        if let Some(top) = items.first() {
            if budget_chars > 0 {
                let mut cut = top.clone();
                cut.text = top.text.chars().take(budget_chars).collect();
                return FittedContext {
                    items: vec![cut],
                    dropped: items.len() - 1,
                    truncated: true,
                };
            }
        }
    }

    FittedContext {
        dropped: items.len() - kept.len(),
        items: kept,
        truncated: false,
    }
}

/// Render the full prompt.
pub fn build_prompt(query: &str, context: &[RetrievedChunk], history: &[Turn]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    prompt.push_str("\n\n");

    if !history.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for turn in history {
            prompt.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
        }
        prompt.push('\n');
    }

    prompt.push_str(CONTEXT_HEADER);
    for (i, chunk) in context.iter().enumerate() {
        prompt.push_str(&format!(
            "[Source {}] (document {})\n{}\n\n",
            i + 1,
            chunk.document_id,
            chunk.text
        ));
    }

    prompt.push_str(QUESTION_HEADER);
    prompt.push_str(&format!(" {}\n\nAnswer:", query));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: format!("{}-c", doc),
            document_id: doc.to_string(),
            text: text.to_string(),
            score,
        }
    }

    #[test]
    fn test_everything_fits() {
        let items = vec![chunk("a", "12345", 0.9), chunk("b", "67890", 0.8)];
        let fitted = fit_context(&items, 10);
        assert_eq!(fitted.items.len(), 2);
        assert_eq!(fitted.dropped, 0);
        assert!(!fitted.truncated);
    }

    #[test]
    fn test_lowest_ranked_dropped_first() {
        let items = vec![
            chunk("a", "aaaa", 0.9),
            chunk("b", "bbbb", 0.8),
            chunk("c", "cccc", 0.7),
        ];
        let fitted = fit_context(&items, 9);
        let docs: Vec<&str> = fitted.items.iter().map(|c| c.document_id.as_str()).collect();
        assert_eq!(docs, vec!["a", "b"]);
        assert_eq!(fitted.dropped, 1);
    }

    #[test]
    fn test_oversized_top_chunk_truncated() {
        let items = vec![chunk("a", "héllo wörld", 0.9), chunk("b", "x", 0.1)];
        let fitted = fit_context(&items, 4);
        assert!(fitted.truncated);
        assert_eq!(fitted.items.len(), 1);
        assert_eq!(fitted.items[0].text, "héll");
        assert_eq!(fitted.dropped, 1);
    }

    #[test]
    fn test_empty_context() {
        let fitted = fit_context(&[], 100);
        assert!(fitted.items.is_empty());
        assert_eq!(fitted.dropped, 0);
    }

    #[test]
    fn test_prompt_layout() {
        let history = vec![Turn {
            question: "earlier?".into(),
            answer: "yes".into(),
        }];
        let prompt = build_prompt("now?", &[chunk("d1", "some fact", 0.5)], &history);
        let hist = prompt.find("Q: earlier?").unwrap();
        let ctx = prompt.find(CONTEXT_HEADER).unwrap();
        let fact = prompt.find("some fact").unwrap();
        let question = prompt.find("Question: now?").unwrap();
        assert!(hist < ctx && ctx < fact && fact < question);
        assert!(prompt.contains("(document d1)"));
    }
}
