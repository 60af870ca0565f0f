//! C1: lower-case, punctuation-stripped whitespace tokenization for BM25.
//!
//! Deliberately narrower than the teacher's `search::bm25::sanitize_fts5_query`
//! (which exists to keep an FTS5 MATCH expression syntactically valid, not to
//! produce scoring tokens): no stop-word removal, no stemming, no FTS5 syntax
//! concerns. The same function tokenizes indexed text and queries so BM25
//! term matching is exact.

const STRIP_CHARS: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\''];

/// Lower-case, split on whitespace, strip `STRIP_CHARS` from each token's
/// edges, discard tokens that become empty.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(STRIP_CHARS))
        .filter(|word| !word.is_empty())
        .map(|word| word.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_splits_on_whitespace() {
        assert_eq!(tokenize("Hybrid Search"), vec!["hybrid", "search"]);
    }

    #[test]
    fn strips_specified_punctuation() {
        assert_eq!(
            tokenize("What is RAG? \"BM25\", really!"),
            vec!["what", "is", "rag", "bm25", "really"]
        );
    }

    #[test]
    fn discards_tokens_that_become_empty() {
        assert_eq!(tokenize("... !! ??"), Vec::<String>::new());
    }

    #[test]
    fn does_not_stem_or_remove_stop_words() {
        // "the" and "searching" survive unchanged — no stemming, no stop-words.
        assert_eq!(tokenize("the searching is"), vec!["the", "searching", "is"]);
    }

    #[test]
    fn empty_input_yields_empty_sequence() {
        assert_eq!(tokenize(""), Vec::<String>::new());
        assert_eq!(tokenize("   "), Vec::<String>::new());
    }

    #[test]
    fn indexed_text_and_query_tokenize_identically() {
        let indexed = tokenize("Reciprocal Rank Fusion combines BM25 and vector search.");
        let query = tokenize("reciprocal rank fusion BM25 vector search");
        assert!(query.iter().all(|t| indexed.contains(t)));
    }
}
