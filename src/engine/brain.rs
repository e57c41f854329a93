//! Brain snapshots and the engine that publishes them.
//!
//! A [`Brain`] holds everything loading produces: the topic graph, the
//! definition tables, object bindings and the compiled trigger patterns.
//! Loading mutates a *staging* brain; [`Engine::publish`] sorts a clone of it
//! and swaps it in as the snapshot that replies read. Readers hold an
//! `Arc<Brain>` for a whole turn, so a publish never disturbs a reply in
//! flight.
//!
//! ```text
//! load_file / stream ──> staging (Mutex<Brain>)
//!                              │ clone + sort()
//!                              v
//!                     published (RwLock<Arc<Brain>>) ──> Resolver
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use tracing::{debug, info, warn};

use super::pattern::{self, CompiledPattern};
use super::script::{ParseReport, parse_script};
use super::sorter::sort_triggers;
use super::tables::Definitions;
use super::topics::{Cycle, TopicGraph};
use crate::Session;
use crate::error::ParseError;
use crate::external::{KeywordExtractor, KnowledgeProvider, Language, LongTermStore, ObjectHandler, Translator, WordExtractor};

#[derive(Debug, Clone)]
pub(crate) struct Brain {
    pub graph: TopicGraph,
    pub defs: Definitions,
    /// Object name to the language it was declared with.
    pub objects: HashMap<String, String>,
    pub language: Language,
    pub depth: usize,
    patterns: HashMap<String, CompiledPattern>,
}

impl Brain {
    pub fn new(depth: usize) -> Self {
        Brain {
            graph: TopicGraph::default(),
            defs: Definitions::default(),
            objects: HashMap::new(),
            language: Language::default(),
            depth,
            patterns: HashMap::new(),
        }
    }

    /// Set or delete (`None`) a global. Returns `false` when the value is rejected.
    ///
    /// `depth` must be an integer and `debug` a boolean word; both also
    /// update the engine state they name.
    pub fn set_global(&mut self, name: &str, value: Option<&str>) -> bool {
        let Some(value) = value.filter(|v| *v != "<undef>") else {
            self.defs.globals.remove(name);
            return true;
        };

        match name {
            "depth" => match value.trim().parse::<usize>() {
                Ok(depth) => self.depth = depth,
                Err(_) => {
                    warn!(value, "depth must be a whole number");
                    return false;
                }
            },
            "debug" => {
                if !matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "false" | "0" | "no") {
                    warn!(value, "debug must be true or false");
                    return false;
                }
            }
            _ => {}
        }
        self.defs.globals.insert(name.to_string(), value.to_string());
        true
    }

    pub fn set_variable(&mut self, name: &str, value: Option<&str>) {
        match value.filter(|v| *v != "<undef>") {
            Some(value) => {
                self.defs.vars.insert(name.to_string(), value.to_string());
            }
            None => {
                self.defs.vars.remove(name);
            }
        }
    }

    pub fn set_substitution(&mut self, pattern: &str, output: Option<&str>) {
        match output.filter(|v| *v != "<undef>") {
            Some(output) => self.defs.subs.set(pattern, output),
            None => self.defs.subs.remove(pattern),
        }
    }

    pub fn set_person_substitution(&mut self, pattern: &str, output: Option<&str>) {
        match output.filter(|v| *v != "<undef>") {
            Some(output) => self.defs.person.set(pattern, output),
            None => self.defs.person.remove(pattern),
        }
    }

    /// Normalize a message for matching: lowercase, fold accents, apply `! sub`.
    pub fn format_message(&self, message: &str) -> String {
        let folded: String = message.to_lowercase().chars().map(fold_accent).collect();
        self.defs.subs.apply(&folded).trim().to_string()
    }

    /// Rebuild the match order of every topic and compile its patterns.
    ///
    /// Cycles in `includes`/`inherits` are cut and returned, one per topic.
    pub fn sort(&mut self) -> Vec<Cycle> {
        self.graph.link();

        let names: Vec<String> = self.graph.iter().map(|t| t.name.clone()).collect();
        let mut cycles = Vec::new();
        let mut orders = Vec::with_capacity(names.len());
        for name in &names {
            let flat = self.graph.topic_triggers(name, &mut cycles);
            orders.push(sort_triggers(&flat));
        }
        for (name, order) in names.iter().zip(orders) {
            debug!(topic = %name, triggers = order.len(), "sorted");
            let topic = self.graph.topic_mut(name);
            topic.index_previous();
            topic.set_sorted(order);
        }

        let mut patterns = HashMap::new();
        for topic in self.graph.iter() {
            let paired = topic.previous().flat_map(|(prev, trigs)| std::iter::once(prev).chain(trigs.iter().map(String::as_str)));
            for raw in topic.sorted().iter().map(String::as_str).chain(paired) {
                if !patterns.contains_key(raw) {
                    patterns.insert(raw.to_string(), CompiledPattern::new(raw, &self.defs));
                }
            }
        }
        self.patterns = patterns;

        let mut seen = HashSet::new();
        cycles.retain(|c| seen.insert(c.topic.clone()));
        cycles
    }

    pub fn pattern(&self, raw: &str) -> Option<&CompiledPattern> {
        self.patterns.get(raw)
    }
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

// --- Engine ------------------------------------------------------------------

/// Collaborators plugged in by the embedding application.
pub(crate) struct Collaborators {
    /// Object handlers keyed by lowercased language name.
    pub handlers: HashMap<String, Arc<dyn ObjectHandler>>,
    pub store: Option<Arc<dyn LongTermStore>>,
    pub knowledge: Option<Arc<dyn KnowledgeProvider>>,
    pub translator: Option<Arc<dyn Translator>>,
    pub extractor: Arc<dyn KeywordExtractor>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            handlers: HashMap::new(),
            store: None,
            knowledge: None,
            translator: None,
            extractor: Arc::new(WordExtractor),
        }
    }
}

/// Compiled session-bound regexes kept between publishes. Oldest go first.
const SESSION_REGEX_LIMIT: usize = 256;

/// Shared engine state behind an `Interpreter`.
pub(crate) struct Engine {
    staging: Mutex<Brain>,
    published: RwLock<Arc<Brain>>,
    pub collaborators: Collaborators,
    regexes: Mutex<IndexMap<String, Regex>>,
    rng: Mutex<ChaCha8Rng>,
}

impl Engine {
    pub fn new(depth: usize, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Engine {
            staging: Mutex::new(Brain::new(depth)),
            published: RwLock::new(Arc::new(Brain::new(depth))),
            collaborators: Collaborators::default(),
            regexes: Mutex::new(IndexMap::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// The snapshot replies currently read.
    pub fn snapshot(&self) -> Arc<Brain> {
        self.published.read().clone()
    }

    /// Parse `code` into the staging brain.
    pub fn load(&self, source: &str, code: &str) -> Result<ParseReport, ParseError> {
        let mut staging = self.staging.lock();
        let report = parse_script(&mut staging, &self.collaborators.handlers, source, code)?;
        info!(source, lines = report.lines, warnings = report.warnings.len(), "script loaded");
        Ok(report)
    }

    /// Mutate the staging brain and publish the result.
    pub fn update<T>(&self, f: impl FnOnce(&mut Brain) -> T) -> T {
        let mut staging = self.staging.lock();
        let out = f(&mut staging);
        self.publish_locked(&staging);
        out
    }

    /// Sort the staging brain and make it the live snapshot.
    pub fn publish(&self) -> Vec<Cycle> {
        let staging = self.staging.lock();
        self.publish_locked(&staging)
    }

    fn publish_locked(&self, staging: &Brain) -> Vec<Cycle> {
        let mut next = staging.clone();
        let cycles = next.sort();
        for cycle in &cycles {
            warn!(topic = %cycle.topic, path = %cycle.path.join(" -> "), "inheritance cycle cut");
        }
        *self.published.write() = Arc::new(next);
        self.regexes.lock().clear();
        cycles
    }

    /// Load code produced at reply time (`{!...}`) and publish it at once.
    pub fn stream_live(&self, code: &str) {
        let mut staging = self.staging.lock();
        match parse_script(&mut staging, &self.collaborators.handlers, "(streamed)", code) {
            Ok(report) => debug!(warnings = report.warnings.len(), "streamed code from reply"),
            Err(err) => warn!(%err, "streamed code rejected"),
        }
        self.publish_locked(&staging);
    }

    /// Match `text` against the raw trigger `pattern` and return its stars.
    pub fn match_pattern(&self, brain: &Brain, session: &Session, raw: &str, text: &str) -> Option<Vec<String>> {
        let compiled = match brain.pattern(raw) {
            Some(compiled) => compiled,
            None => {
                warn!(pattern = raw, "pattern missing from snapshot");
                return None;
            }
        };

        if let Some(re) = compiled.fixed() {
            return pattern::stars(re, text);
        }
        if !compiled.is_session_bound() {
            return None;
        }

        let source = compiled.source(&brain.defs, session);
        let mut cache = self.regexes.lock();
        if let Some(re) = cache.get(&source) {
            return pattern::stars(re, text);
        }
        let re = match Regex::new(&source) {
            Ok(re) => re,
            Err(err) => {
                warn!(pattern = raw, %err, "session pattern does not compile");
                return None;
            }
        };
        let stars = pattern::stars(&re, text);
        if cache.len() >= SESSION_REGEX_LIMIT {
            cache.shift_remove_index(0);
        }
        cache.insert(source, re);
        stars
    }

    /// Pick an index in `0..len` from the shared random source.
    pub fn pick(&self, len: usize) -> usize {
        use rand::Rng;
        if len <= 1 {
            return 0;
        }
        self.rng.lock().gen_range(0..len)
    }

    /// Pick an index with probability proportional to its weight.
    /// `None` when there is nothing to pick from.
    pub fn pick_weighted(&self, weights: &[u64]) -> Option<usize> {
        match WeightedIndex::new(weights) {
            Ok(dist) => Some(dist.sample(&mut *self.rng.lock())),
            Err(err) => {
                debug!(%err, "no weighted choice");
                None
            }
        }
    }

    #[cfg(test)]
    fn cached_regexes(&self) -> usize {
        self.regexes.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(code: &str) -> Engine {
        let engine = Engine::new(50, Some(7));
        engine.load("(test)", code).unwrap();
        engine.publish();
        engine
    }

    #[test]
    fn format_message_folds_case_accents_and_subs() {
        let mut brain = Brain::new(50);
        brain.set_substitution("what's", Some("what is"));
        assert_eq!(brain.format_message("  What's the CAFÉ señor? "), "what is the cafe senor?");
    }

    #[test]
    fn globals_validate_depth_and_debug() {
        let mut brain = Brain::new(50);
        assert!(brain.set_global("depth", Some("5")));
        assert_eq!(brain.depth, 5);
        assert!(!brain.set_global("depth", Some("deep")));
        assert_eq!(brain.depth, 5);
        assert!(!brain.set_global("debug", Some("maybe")));
        assert!(brain.set_global("debug", Some("yes")));
        assert!(brain.set_global("debug", None));
        assert!(brain.defs.global("debug").is_none());
    }

    #[test]
    fn publish_swaps_the_snapshot() {
        let engine = Engine::new(50, Some(1));
        let before = engine.snapshot();
        engine.load("(test)", "+ hello\n- hi").unwrap();
        assert!(engine.snapshot().graph.get("random").is_none());
        engine.publish();
        assert!(before.graph.get("random").is_none());
        assert_eq!(engine.snapshot().graph.get("random").unwrap().sorted(), ["hello"]);
    }

    #[test]
    fn matches_fixed_and_session_bound_patterns() {
        let engine = loaded("+ my name is *\n- ok\n+ i am <get age>\n- ok");
        let brain = engine.snapshot();
        let mut session = Session::new("u", 9);
        session.set("age", "30");

        assert_eq!(engine.match_pattern(&brain, &session, "my name is *", "my name is bob"), Some(vec!["bob".to_string()]));
        assert_eq!(engine.match_pattern(&brain, &session, "i am <get age>", "i am 30"), Some(vec![]));
        assert_eq!(engine.match_pattern(&brain, &session, "i am <get age>", "i am 31"), None);
    }

    #[test]
    fn session_regex_cache_stays_bounded() {
        let engine = loaded("+ i am <get age>\n- ok");
        let brain = engine.snapshot();
        let mut session = Session::new("u", 9);

        for n in 0..1000 {
            session.set("age", n.to_string());
            let text = format!("i am {n}");
            assert_eq!(engine.match_pattern(&brain, &session, "i am <get age>", &text), Some(vec![]));
        }
        assert_eq!(engine.cached_regexes(), SESSION_REGEX_LIMIT);

        // Evicted sources still compile and match again.
        session.set("age", "0");
        assert_eq!(engine.match_pattern(&brain, &session, "i am <get age>", "i am 0"), Some(vec![]));
        assert_eq!(engine.cached_regexes(), SESSION_REGEX_LIMIT);
    }

    #[test]
    fn weighted_pick_handles_huge_weights() {
        let engine = Engine::new(50, Some(3));
        assert_eq!(engine.pick_weighted(&[]), None);
        for _ in 0..50 {
            assert_eq!(engine.pick_weighted(&[0, 100_000_000_000, 0]), Some(1));
        }
    }

    #[test]
    fn cycles_are_reported_on_publish() {
        let engine = Engine::new(50, Some(1));
        engine.load("(test)", "> topic a inherits b\n+ x\n- y\n< topic\n> topic b inherits a\n+ z\n- w\n< topic").unwrap();
        let cycles = engine.publish();
        assert!(!cycles.is_empty());
        assert!(engine.snapshot().graph.get("a").is_some());
    }
}
