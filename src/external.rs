//! Collaborator contracts.
//!
//! The engine reaches the outside world only through the traits below. Each is
//! injected into an [`Interpreter`](crate::Interpreter) at startup and invoked
//! synchronously from inside a conversation turn, so implementations should
//! bound their own latency.
//!
//! [`MemoryStore`] is a process-local [`LongTermStore`] used by the console
//! binary and the tests.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

/// A working language tag, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Language(String);

impl Language {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Language(tag.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Language("english".to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime for one embedded scripting language (`> object NAME LANG` blocks).
pub trait ObjectHandler: Send + Sync {
    /// Receive the raw source lines of object `name`. Returns false when the
    /// code could not be loaded.
    fn load(&self, name: &str, code: &[String]) -> bool;

    /// Run object `name` for `user` and return its text output.
    fn call(&self, name: &str, user: &str, args: &[String]) -> String;
}

/// External long-form question answering, consulted on a knowledge-search miss.
pub trait KnowledgeProvider: Send + Sync {
    fn answer(&self, text: &str) -> Option<String>;

    /// Language the provider expects questions in and answers with.
    fn language(&self) -> Language;
}

pub trait Translator: Send + Sync {
    fn translate(&self, text: &str, target: &Language) -> String;
}

/// Memory behind knowledge-search actions and learned facts.
pub trait LongTermStore: Send + Sync {
    /// Look up an answer by exact key, falling back to `tags` (captured stars).
    fn find(&self, query: &str, tags: &[String]) -> Option<String>;

    fn save(&self, key: &str, value: &str, tags: &BTreeSet<String>);
}

pub trait KeywordExtractor: Send + Sync {
    fn keywords(&self, text: &str) -> BTreeSet<String>;
}

/// Splits text into lowercase alphanumeric words of three or more characters.
///
/// Used when no extractor is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordExtractor;

impl KeywordExtractor for WordExtractor {
    fn keywords(&self, text: &str) -> BTreeSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3)
            .map(str::to_lowercase)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub content: String,
    pub tags: BTreeSet<String>,
    pub saved_at: DateTime<Utc>,
}

/// In-memory [`LongTermStore`].
///
/// Lookup order for `find(query, tags)`:
///
/// 1. a record keyed exactly by `query`;
/// 2. a record keyed exactly by one of `tags` (first tag with a record decides);
/// 3. the record sharing the most tags with `tags` (ties go to the newest);
/// 4. the key of a record whose content equals `query`;
/// 5. the key of a record whose content equals one of `tags`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<IndexMap<String, MemoryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<MemoryRecord> {
        self.records.read().get(key).cloned()
    }
}

impl LongTermStore for MemoryStore {
    fn find(&self, query: &str, tags: &[String]) -> Option<String> {
        let records = self.records.read();

        if let Some(record) = records.get(query) {
            if !record.content.is_empty() {
                debug!(query, "memory hit by key");
                return Some(record.content.clone());
            }
        } else if let Some(record) = tags.iter().find_map(|tag| records.get(tag.trim())) {
            if !record.content.is_empty() {
                debug!(query, "memory hit by tag key");
                return Some(record.content.clone());
            }
        }

        let wanted: BTreeSet<&str> = tags.iter().map(|t| t.trim()).collect();
        let best = records
            .values()
            .map(|r| (r.tags.iter().filter(|t| wanted.contains(t.as_str())).count(), r))
            .filter(|(overlap, _)| *overlap > 0)
            .max_by(|(a, ra), (b, rb)| a.cmp(b).then(ra.saved_at.cmp(&rb.saved_at)));
        if let Some((overlap, record)) = best {
            debug!(query, overlap, "memory hit by tag overlap");
            return Some(record.content.clone());
        }

        let by_content = |text: &str| records.iter().find(|(_, r)| r.content == text).map(|(k, _)| k.clone());
        if let Some(key) = by_content(query) {
            debug!(query, "memory hit by content");
            return Some(key);
        }
        tags.iter().find_map(|tag| by_content(tag.trim()))
    }

    fn save(&self, key: &str, value: &str, tags: &BTreeSet<String>) {
        let mut tags = tags.clone();
        if tags.is_empty() {
            tags.insert(key.to_string());
        }
        debug!(key, tags = tags.len(), "memory save");
        let record = MemoryRecord { content: value.to_string(), tags, saved_at: Utc::now() };
        self.records.write().insert(key.to_string(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn language_is_case_insensitive() {
        assert_eq!(Language::new(" Spanish "), Language::new("spanish"));
        assert_eq!(Language::default().as_str(), "english");
    }

    #[test]
    fn word_extractor_drops_short_words() {
        let words = WordExtractor.keywords("What is the Capital of France?");
        assert_eq!(words, tags(&["capital", "france", "the", "what"]));
    }

    #[test]
    fn memory_store_lookup_order() {
        let store = MemoryStore::new();
        store.save("what is a cat", "a small feline", &tags(&["cat", "feline"]));
        store.save("paris", "the capital of france", &tags(&["capital", "france"]));

        assert_eq!(store.find("what is a cat", &[]).as_deref(), Some("a small feline"));
        assert_eq!(store.find("who knows", &["paris".to_string()]).as_deref(), Some("the capital of france"));
        assert_eq!(
            store.find("tell me about france", &["france".to_string(), "capital".to_string()]).as_deref(),
            Some("the capital of france")
        );
        assert_eq!(store.find("a small feline", &[]).as_deref(), Some("what is a cat"));
        assert_eq!(store.find("nothing", &["dog".to_string()]), None);
    }

    #[test]
    fn empty_tags_fall_back_to_the_key() {
        let store = MemoryStore::new();
        store.save("ocean", "big water", &BTreeSet::new());
        assert_eq!(store.get("ocean").map(|r| r.tags), Some(tags(&["ocean"])));
        assert_eq!(store.find("unknown", &["ocean".to_string()]).as_deref(), Some("big water"));
    }
}
