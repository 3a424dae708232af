//! Word-option computation for the choosing_word phase.
//!
//! The translation catalog itself is an external collaborator; this module
//! owns the script-resolution rules, the fallback chain, the used-word
//! filter with recycle-on-exhaustion, and the baked-in last-resort pool.

use futures::future::BoxFuture;
use rand::seq::SliceRandom;

use crate::dao::models::RoomSettings;

/// Number of options offered to the drawer each turn.
pub const WORD_OPTION_COUNT: usize = 3;

/// Last-resort pool when the catalog cannot produce enough words.
const FALLBACK_WORDS: [&str; 10] = [
    "tree", "house", "cat", "sun", "boat", "apple", "fish", "star", "bridge", "cloud",
];

/// Which word list a (language, script) pair maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lexicon {
    /// English words in roman script.
    EnglishRoman,
    /// Roman transliteration in the given language.
    Roman(String),
    /// Native script in the given language.
    Native(String),
}

/// Apply the script mapping rules to the room settings.
///
/// English rooms always use English words; otherwise `script = english/roman`
/// selects English, `default` the roman transliteration, `native` the native
/// script of the room's language.
pub fn resolve_lexicon(settings: &RoomSettings) -> Lexicon {
    let language = settings.language.to_lowercase();
    if language == "english" {
        return Lexicon::EnglishRoman;
    }
    match settings.script.to_lowercase().as_str() {
        "english" | "roman" => Lexicon::EnglishRoman,
        "native" => Lexicon::Native(language),
        _ => Lexicon::Roman(language),
    }
}

/// Primary lexicon followed by its fallbacks:
/// roman in target language, native in target language, English roman.
pub fn fallback_chain(settings: &RoomSettings) -> Vec<Lexicon> {
    let primary = resolve_lexicon(settings);
    let language = settings.language.to_lowercase();
    let mut chain = vec![primary];
    for candidate in [
        Lexicon::Roman(language.clone()),
        Lexicon::Native(language),
        Lexicon::EnglishRoman,
    ] {
        if !chain.contains(&candidate) {
            chain.push(candidate);
        }
    }
    chain
}

/// Seam to the word-translation catalog collaborator.
///
/// Returns the candidate words for a lexicon restricted to the given
/// categories (empty categories means every category). Failures surface as
/// an empty list; the fallback chain and built-in pool cover them.
pub trait WordCatalog: Send + Sync {
    fn fetch(
        &self,
        lexicon: Lexicon,
        categories: Vec<String>,
        country: String,
    ) -> BoxFuture<'static, Vec<String>>;
}

/// Built-in catalog backed by the fallback pool; the default when no
/// external catalog is wired in (tests, local development).
pub struct StaticWordCatalog;

impl WordCatalog for StaticWordCatalog {
    fn fetch(
        &self,
        _lexicon: Lexicon,
        _categories: Vec<String>,
        _country: String,
    ) -> BoxFuture<'static, Vec<String>> {
        Box::pin(async { FALLBACK_WORDS.iter().map(|w| w.to_string()).collect() })
    }
}

/// Draw the drawer's word options.
///
/// Walks the fallback chain until a lexicon yields candidates, filters words
/// already used this game, recycles (drops the filter for this turn) when
/// fewer than three unique words remain, and falls back to the baked-in pool
/// as a last resort.
pub async fn compute_options(
    catalog: &dyn WordCatalog,
    settings: &RoomSettings,
    used_words: &[String],
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for lexicon in fallback_chain(settings) {
        candidates = catalog
            .fetch(
                lexicon,
                settings.category.clone(),
                settings.country.clone(),
            )
            .await;
        candidates.sort();
        candidates.dedup();
        if !candidates.is_empty() {
            break;
        }
    }

    let fresh: Vec<String> = candidates
        .iter()
        .filter(|word| !used_words.contains(word))
        .cloned()
        .collect();

    let pool = if fresh.len() >= WORD_OPTION_COUNT {
        fresh
    } else if candidates.len() >= WORD_OPTION_COUNT {
        // Every fresh word is spent; recycle for this turn.
        candidates
    } else {
        FALLBACK_WORDS.iter().map(|w| w.to_string()).collect()
    };

    let mut rng = rand::thread_rng();
    pool.choose_multiple(&mut rng, WORD_OPTION_COUNT)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(language: &str, script: &str) -> RoomSettings {
        RoomSettings {
            language: language.into(),
            script: script.into(),
            ..RoomSettings::default()
        }
    }

    struct FixedCatalog(Vec<&'static str>);

    impl WordCatalog for FixedCatalog {
        fn fetch(
            &self,
            _lexicon: Lexicon,
            _categories: Vec<String>,
            _country: String,
        ) -> BoxFuture<'static, Vec<String>> {
            let words: Vec<String> = self.0.iter().map(|w| w.to_string()).collect();
            Box::pin(async move { words })
        }
    }

    struct EmptyCatalog;

    impl WordCatalog for EmptyCatalog {
        fn fetch(
            &self,
            _lexicon: Lexicon,
            _categories: Vec<String>,
            _country: String,
        ) -> BoxFuture<'static, Vec<String>> {
            Box::pin(async { Vec::new() })
        }
    }

    #[test]
    fn english_language_always_wins_script() {
        assert_eq!(
            resolve_lexicon(&settings("english", "native")),
            Lexicon::EnglishRoman
        );
    }

    #[test]
    fn script_mapping_for_other_languages() {
        assert_eq!(
            resolve_lexicon(&settings("turkish", "english")),
            Lexicon::EnglishRoman
        );
        assert_eq!(
            resolve_lexicon(&settings("turkish", "default")),
            Lexicon::Roman("turkish".into())
        );
        assert_eq!(
            resolve_lexicon(&settings("turkish", "native")),
            Lexicon::Native("turkish".into())
        );
    }

    #[test]
    fn chain_orders_roman_native_english() {
        let chain = fallback_chain(&settings("turkish", "native"));
        assert_eq!(
            chain,
            vec![
                Lexicon::Native("turkish".into()),
                Lexicon::Roman("turkish".into()),
                Lexicon::EnglishRoman,
            ]
        );
    }

    #[tokio::test]
    async fn options_are_three_distinct_unused_words() {
        let catalog = FixedCatalog(vec!["a", "b", "c", "d", "e"]);
        let used = vec!["a".to_string(), "b".to_string()];
        let options = compute_options(&catalog, &settings("english", "default"), &used).await;
        assert_eq!(options.len(), 3);
        assert!(options.iter().all(|w| !used.contains(w)));
        let mut unique = options.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_pool_recycles_used_words() {
        let catalog = FixedCatalog(vec!["a", "b", "c"]);
        let used = vec!["a".to_string(), "b".to_string()];
        let options = compute_options(&catalog, &settings("english", "default"), &used).await;
        assert_eq!(options.len(), 3);
    }

    #[tokio::test]
    async fn empty_catalog_falls_back_to_builtin_pool() {
        let options = compute_options(&EmptyCatalog, &settings("english", "default"), &[]).await;
        assert_eq!(options.len(), 3);
        assert!(options
            .iter()
            .all(|w| FALLBACK_WORDS.contains(&w.as_str())));
    }
}
