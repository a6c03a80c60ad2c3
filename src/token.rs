use std::collections::{BTreeMap, HashSet};

use unicode_segmentation::UnicodeSegmentation;

lazy_static::lazy_static! {
    pub static ref STOP_WORDS_NLTK: HashSet<String> = {
        let words = stop_words::get(stop_words::LANGUAGE::English);
        words.into_iter().collect()
    };
}

/// Drops an English possessive `'s`, including the typographic apostrophes.
fn trim_possessive(word: &mut String) {
    for suffix in ["'s", "\u{2019}s", "\u{FF07}s"] {
        if word.len() > suffix.len() && word.ends_with(suffix) {
            word.truncate(word.len() - suffix.len());
            return;
        }
    }
}

/// Splits `text` on Unicode word boundaries and returns lowercased,
/// stemmed terms with English stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.unicode_words() {
        let mut lowercase = word.to_lowercase();
        trim_possessive(&mut lowercase);
        if STOP_WORDS_NLTK.contains(&lowercase) {
            continue;
        }
        let token = tantivy_stemmers::algorithms::english_porter(&lowercase).to_string();
        if token.is_empty() {
            continue;
        }
        tokens.push(token);
    }
    tokens
}

/// Term counts of `text`, sorted by term, ready for `Bm25Index::insert_document`.
pub fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("The runner's shoes were RUNNING quickly, and the runners ran.");
        assert!(!tokens.iter().any(|t| t == "the" || t == "and" || t == "were"));
        assert!(tokens.iter().all(|t| t.chars().all(|c| !c.is_uppercase())));
        assert_eq!(tokens.iter().filter(|t| t.as_str() == "runner").count(), 2);
        assert!(tokens.contains(&"run".to_string()));
    }

    #[test]
    fn test_possessive() {
        let mut word = "bob\u{2019}s".to_string();
        trim_possessive(&mut word);
        assert_eq!(word, "bob");
        let mut word = "'s".to_string();
        trim_possessive(&mut word);
        assert_eq!(word, "'s");
    }

    #[test]
    fn test_term_frequencies() {
        let counts = term_frequencies("apple banana apple cherry apple banana");
        let flat: Vec<_> = counts.iter().map(|(t, &c)| (t.as_str(), c)).collect();
        assert_eq!(flat, vec![("appl", 3), ("banana", 2), ("cherri", 1)]);
        assert!(term_frequencies("").is_empty());
        assert!(term_frequencies("the and of").is_empty());
    }
}
