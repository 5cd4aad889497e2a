//! Full-text search input helpers.
//!
//! MySQL boolean-mode `MATCH ... AGAINST` treats several characters as
//! operators and ignores short words and stop words. These helpers turn free
//! text typed by a user into a safe search expression.

/// Operator characters trimmed from both ends of the input.
const OPERATOR_CHARS: &[char] = &['+', '-', '<', '>', '~', '*', ',', '$'];

/// Words the default InnoDB full-text parser ignores.
const STOP_WORDS: &[&str] = &[
    "about", "are", "com", "for", "from", "how", "that", "the", "this", "was", "what", "when",
    "where", "who", "will", "with", "und", "www",
];

/// Words of this many bytes or fewer never match (minimum token size is 3).
const MIN_WORD_LEN: usize = 2;

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.iter().any(|stop| stop.eq_ignore_ascii_case(word))
}

/// Strip operator characters from the ends of `value` and drop words that
/// could never match: anything of two bytes or less, and stop words.
/// The remaining words are joined with single spaces.
pub fn fts_cleanup(value: &str) -> String {
    value
        .trim_matches(OPERATOR_CHARS)
        .split_whitespace()
        .filter(|word| word.len() > MIN_WORD_LEN && !is_stop_word(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clean `value` and require every remaining word (`+word` in boolean mode).
///
/// Returns an empty string when nothing survives cleanup.
pub fn fts_word_break(value: &str) -> String {
    fts_cleanup(value)
        .split(' ')
        .filter(|word| !word.is_empty())
        .map(|word| format!("+{word}"))
        .collect::<Vec<_>>()
        .join(" ")
}
