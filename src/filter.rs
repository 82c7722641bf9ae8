//! Pure content filtering applied before indexing and querying.
//!
//! Two compile-time word sets drive the filter: a generic English stop list
//! and a domain list of terms so frequent in the corpus that indexing them
//! only bloats the posting lists. Document content loses both; queries lose
//! only the stop words, since a user may legitimately search a common term.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 50;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| STOP_LIST.iter().copied().collect());

static COMMON_WORDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| COMMON_LIST.iter().copied().collect());

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("valid regex"));

const STOP_LIST: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself", "him",
    "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me",
    "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only",
    "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should",
    "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "to", "too", "under", "until", "up",
    "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why",
    "will", "with", "you", "your", "yours", "yourself", "yourselves",
];

// High-frequency corpus terms. Dominated by meme/media vocabulary because
// that is what the ingested feeds are full of.
const COMMON_LIST: &[&str] = &[
    "best", "cat", "cats", "click", "comment", "comments", "cool", "cute", "daily", "dog",
    "dogs", "epic", "follow", "free", "fun", "funny", "gif", "gifs", "image", "images", "lol",
    "like", "likes", "meme", "memes", "new", "online", "page", "photo", "photos", "pic", "pics",
    "popular", "post", "posts", "share", "site", "top", "trending", "video", "videos", "viral",
    "watch", "web",
];

fn keep_token(token: &str) -> bool {
    let len = token.chars().count();
    (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&len)
}

/// True when `token` belongs to either word set, case-insensitively.
pub fn is_common_term(token: &str) -> bool {
    let lower = token.to_lowercase();
    STOP_WORDS.contains(lower.as_str()) || COMMON_WORDS.contains(lower.as_str())
}

/// Reduce raw document content to the tokens worth indexing: lowercased,
/// stripped of punctuation runs, and with stop and common terms removed.
/// Idempotent: filtering already-filtered content is a no-op.
pub fn filter_content(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let spaced = NON_WORD.replace_all(&lowered, " ");
    spaced
        .split_whitespace()
        .filter(|token| {
            keep_token(token) && !STOP_WORDS.contains(*token) && !COMMON_WORDS.contains(*token)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Query-side variant: strips only the stop words and preserves the original
/// case of every retained token.
pub fn filter_query(raw: &str) -> String {
    let spaced = NON_WORD.replace_all(raw, " ");
    spaced
        .split_whitespace()
        .filter(|token| {
            keep_token(token) && !STOP_WORDS.contains(token.to_lowercase().as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_content_basic() {
        assert_eq!(
            filter_content("JavaScript programming tutorial"),
            "javascript programming tutorial"
        );
    }

    #[test]
    fn test_filter_content_removes_stop_and_common() {
        // Every token is either a stop word or a common term.
        assert_eq!(filter_content("The cat is funny meme"), "");
    }

    #[test]
    fn test_filter_content_collapses_punctuation() {
        assert_eq!(
            filter_content("rust!!!   async--runtime (tokio)"),
            "rust async runtime tokio"
        );
    }

    #[test]
    fn test_filter_content_token_length_bounds() {
        // Single characters drop out; a 51-char token drops out.
        let long = "x".repeat(51);
        let input = format!("a b c rust {}", long);
        assert_eq!(filter_content(&input), "rust");
    }

    #[test]
    fn test_filter_content_idempotent() {
        let inputs = [
            "The cat is funny meme",
            "JavaScript programming tutorial",
            "rust!!! async--runtime",
            "",
        ];
        for input in inputs {
            let once = filter_content(input);
            assert_eq!(filter_content(&once), once);
        }
    }

    #[test]
    fn test_filter_query_keeps_common_terms() {
        // "cat" is a common term but must survive on the query side.
        assert_eq!(filter_query("the cat"), "cat");
    }

    #[test]
    fn test_filter_query_preserves_case() {
        assert_eq!(filter_query("The JavaScript Tutorial"), "JavaScript Tutorial");
        assert_eq!(filter_query("CAT Memes"), "CAT Memes");
    }

    #[test]
    fn test_filter_query_idempotent() {
        let once = filter_query("The Cat And The Hat");
        assert_eq!(filter_query(&once), once);
    }

    #[test]
    fn test_is_common_term() {
        assert!(is_common_term("the"));
        assert!(is_common_term("THE"));
        assert!(is_common_term("meme"));
        assert!(!is_common_term("javascript"));
    }
}
