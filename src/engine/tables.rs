//! Definition tables.
//!
//! Process-wide values declared by `! define` lines: globals, bot variables,
//! arrays, and the two substitution tables. They belong to a [`Brain`]
//! snapshot and are never touched by per-user state; session variables live
//! in [`Session`](crate::Session).
//!
//! [`Brain`]: super::brain::Brain

use std::collections::HashMap;

use indexmap::IndexMap;
use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub(crate) struct Definitions {
    pub globals: HashMap<String, String>,
    pub vars: HashMap<String, String>,
    pub arrays: HashMap<String, Vec<String>>,
    pub subs: Substitutions,
    pub person: Substitutions,
}

impl Definitions {
    /// Bot variable, `None` when undefined.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals.get(name).map(String::as_str)
    }

    pub fn array(&self, name: &str) -> Option<&[String]> {
        self.arrays.get(name).map(Vec::as_slice)
    }

    /// Store an array value, splitting every `<crlf>`-separated line on pipes
    /// when it has any and on whitespace otherwise.
    pub fn set_array(&mut self, name: &str, raw: &str) {
        let mut items = Vec::new();
        for line in raw.split("<crlf>") {
            if line.contains('|') {
                items.extend(line.split('|').map(|s| s.trim().to_string()));
            } else {
                items.extend(line.split_whitespace().map(str::to_string));
            }
        }
        items.retain(|item| !item.is_empty());
        self.arrays.insert(name.to_string(), items);
    }
}

// --- Substitutions -----------------------------------------------------------

/// A word-substitution table (`! sub` / `! person`).
///
/// Replacement runs in one pass: at every position the longest pattern that
/// sits on word boundaries wins, and replaced text is never rescanned.
#[derive(Debug, Clone, Default)]
pub(crate) struct Substitutions {
    table: IndexMap<String, String>,
    matcher: Option<Regex>,
}

impl Substitutions {
    pub fn set(&mut self, pattern: &str, output: &str) {
        self.table.insert(pattern.to_lowercase(), output.to_string());
        self.rebuild();
    }

    pub fn remove(&mut self, pattern: &str) {
        self.table.shift_remove(&pattern.to_lowercase());
        self.rebuild();
    }

    #[cfg(test)]
    pub fn get(&self, pattern: &str) -> Option<&str> {
        self.table.get(pattern).map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    fn rebuild(&mut self) {
        let mut patterns: Vec<&String> = self.table.keys().filter(|p| !p.is_empty()).collect();
        patterns.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

        if patterns.is_empty() {
            self.matcher = None;
            return;
        }

        let alternation = patterns.iter().map(|p| regex::escape(p)).collect::<Vec<_>>().join("|");
        match Regex::new(&format!("(?i){alternation}")) {
            Ok(re) => self.matcher = Some(re),
            Err(err) => {
                warn!(%err, "cannot compile substitution table");
                self.matcher = None;
            }
        }
    }

    /// Apply the table to `text`.
    pub fn apply(&self, text: &str) -> String {
        let Some(matcher) = &self.matcher else {
            return text.to_string();
        };

        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut pos = 0;
        while pos <= text.len() {
            let Some(found) = matcher.find_at(text, pos) else { break };
            if on_word_boundaries(text, found.start(), found.end()) {
                let key = found.as_str().to_lowercase();
                if let Some(output) = self.table.get(&key) {
                    out.push_str(&text[copied..found.start()]);
                    out.push_str(output);
                    copied = found.end();
                }
                pos = found.end().max(found.start() + 1);
            } else {
                pos = found.start() + text[found.start()..].chars().next().map_or(1, char::len_utf8);
            }
            while pos < text.len() && !text.is_char_boundary(pos) {
                pos += 1;
            }
        }
        out.push_str(&text[copied..]);
        out
    }
}

fn on_word_boundaries(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_substitution_wins() {
        let mut subs = Substitutions::default();
        subs.set("what's", "what is");
        subs.set("what", "which");
        subs.set("i'm", "i am");

        assert_eq!(subs.apply("what's up"), "what is up");
        assert_eq!(subs.apply("i'm sure what"), "i am sure which");
    }

    #[test]
    fn substitution_respects_word_boundaries() {
        let mut subs = Substitutions::default();
        subs.set("i", "you");
        assert_eq!(subs.apply("i like pie"), "you like pie");
        assert_eq!(subs.apply("this is it"), "this is it");
    }

    #[test]
    fn replaced_text_is_not_rescanned() {
        let mut person = Substitutions::default();
        person.set("i", "you");
        person.set("you", "i");
        assert_eq!(person.apply("i love you"), "you love i");
    }

    #[test]
    fn removing_a_substitution() {
        let mut subs = Substitutions::default();
        subs.set("u", "you");
        subs.remove("u");
        assert_eq!(subs.len(), 0);
        assert_eq!(subs.apply("u there"), "u there");
    }

    #[test]
    fn arrays_split_on_pipes_or_whitespace_per_line() {
        let mut defs = Definitions::default();
        defs.set_array("colors", "red blue<crlf>light green|dark green");
        assert_eq!(
            defs.array("colors"),
            Some(&["red".to_string(), "blue".to_string(), "light green".to_string(), "dark green".to_string()][..])
        );
    }
}
