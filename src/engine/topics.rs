//! Topic graph.
//!
//! Topics are stored in an arena and addressed by [`TopicId`]; a name index
//! maps script names onto ids. Edges (`includes`/`inherits`) are kept as names
//! because scripts may reference a topic before declaring it. Missing targets
//! are created empty by [`TopicGraph::link`] when the brain is sorted.
//!
//! ## Inheritance tagging
//!
//! [`TopicGraph::topic_triggers`] flattens a topic and everything it can see
//! into one list of patterns. Patterns owned by topics that take part in
//! inheritance are prefixed with `{inherits=N}`, where `N` grows by one per
//! `inherits` edge walked (an `includes` edge keeps the level). The sorter
//! ranks untagged patterns first, then level 0, 1, and so on, which lets a
//! child override anything it inherits.
//!
//! ```text
//! > topic child inherits parent      child:  {inherits=0}own patterns
//!                                    parent: {inherits=1}parent patterns
//! ```
//!
//! All traversals keep an on-path set, so a cyclic edge is walked once and
//! reported instead of recursing forever.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, warn};

/// Marker splitting a trigger key into its pattern and its `%Previous`.
pub(crate) const PREVIOUS_MARKER: &str = "{previous}";

pub(crate) type TopicId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionKind {
    KnowledgeSearch,
}

/// Side effect declared with `&` on a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Action {
    pub kind: ActionKind,
    pub content: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Trigger {
    pub topic: String,
    pub pattern: String,
    pub replies: Vec<String>,
    pub redirects: Vec<String>,
    pub conditions: Vec<String>,
    pub actions: Vec<Action>,
    /// False for learned triggers (`=` lines).
    pub persistent: bool,
    /// Set on the bare twin of a `%Previous`-paired trigger.
    pub has_previous: bool,
}

impl Trigger {
    fn new(topic: &str, pattern: &str) -> Self {
        Trigger {
            topic: topic.to_string(),
            pattern: pattern.to_string(),
            replies: Vec::new(),
            redirects: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            persistent: true,
            has_previous: false,
        }
    }

    /// True when the trigger has nothing to answer with.
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.redirects.is_empty() && self.conditions.is_empty() && self.actions.is_empty()
    }

    pub fn has_knowledge_search(&self) -> bool {
        self.actions.iter().any(|a| a.kind == ActionKind::KnowledgeSearch)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Topic {
    pub name: String,
    triggers: IndexMap<String, Trigger>,
    pub includes: Vec<String>,
    pub inherits: Vec<String>,
    /// Match order, valid once the brain is sorted.
    sorted: Vec<String>,
    /// `%Previous` pattern -> paired trigger patterns.
    previous: BTreeMap<String, Vec<String>>,
}

impl Topic {
    fn new(name: &str) -> Self {
        Topic {
            name: name.to_string(),
            triggers: IndexMap::new(),
            includes: Vec::new(),
            inherits: Vec::new(),
            sorted: Vec::new(),
            previous: BTreeMap::new(),
        }
    }

    /// Fetch a trigger by key, creating it on first reference.
    pub fn trigger_mut(&mut self, key: &str) -> &mut Trigger {
        let name = &self.name;
        self.triggers.entry(key.to_string()).or_insert_with(|| Trigger::new(name, key))
    }

    pub fn trigger(&self, key: &str) -> Option<&Trigger> {
        self.triggers.get(key)
    }

    #[cfg(test)]
    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    pub fn sorted(&self) -> &[String] {
        &self.sorted
    }

    pub(crate) fn set_sorted(&mut self, sorted: Vec<String>) {
        self.sorted = sorted;
    }

    pub fn has_previous(&self) -> bool {
        !self.previous.is_empty()
    }

    /// `%Previous` patterns with the trigger patterns paired to each.
    pub fn previous(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.previous.iter().map(|(prev, trigs)| (prev.as_str(), trigs.as_slice()))
    }

    /// Rebuild the `%Previous` index from the trigger keys.
    pub(crate) fn index_previous(&mut self) {
        let mut previous: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in self.triggers.keys() {
            if let Some((pattern, prev)) = key.split_once(PREVIOUS_MARKER) {
                previous.entry(prev.to_string()).or_default().push(pattern.to_string());
            }
        }
        self.previous = previous;
    }

    /// Keys that take part in matching. `%Previous` pairs and their empty twins are left out.
    fn own_patterns(&self) -> impl Iterator<Item = &str> {
        self.triggers
            .iter()
            .filter(|(key, trig)| !key.contains(PREVIOUS_MARKER) && !(trig.has_previous && trig.is_empty()))
            .map(|(key, _)| key.as_str())
    }
}

/// A cyclic `includes`/`inherits` chain found while walking the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Cycle {
    pub topic: String,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Includes,
    Inherits,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TopicGraph {
    topics: Vec<Topic>,
    index: HashMap<String, TopicId>,
}

impl TopicGraph {
    pub fn id(&self, name: &str) -> Option<TopicId> {
        self.index.get(name).copied()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Topic> {
        self.id(name).map(|id| &self.topics[id])
    }

    /// Fetch a topic by name, creating it on first reference.
    pub fn topic_mut(&mut self, name: &str) -> &mut Topic {
        let id = match self.index.get(name) {
            Some(id) => *id,
            None => {
                debug!(topic = name, "new topic");
                self.topics.push(Topic::new(name));
                let id = self.topics.len() - 1;
                self.index.insert(name.to_string(), id);
                id
            }
        };
        &mut self.topics[id]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    /// Create every topic that an edge names but no script declared.
    pub fn link(&mut self) {
        let targets: Vec<String> =
            self.topics.iter().flat_map(|t| t.includes.iter().chain(t.inherits.iter())).cloned().collect();
        for target in targets {
            if !self.exists(&target) {
                warn!(topic = %target, "referenced topic was never declared, creating it empty");
                self.topic_mut(&target);
            }
        }
    }

    /// Every pattern visible from `topic`, with `{inherits=N}` tags applied.
    pub fn topic_triggers(&self, topic: &str, cycles: &mut Vec<Cycle>) -> Vec<String> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.collect_triggers(topic, 0, false, &mut path, &mut out, cycles);
        out
    }

    fn collect_triggers(
        &self,
        topic: &str,
        level: usize,
        inherited: bool,
        path: &mut Vec<String>,
        out: &mut Vec<String>,
        cycles: &mut Vec<Cycle>,
    ) {
        let Some(current) = self.get(topic) else { return };
        path.push(topic.to_string());

        let tagged = !current.inherits.is_empty() || inherited;
        for (edge, next) in current.edges() {
            if path.iter().any(|p| p == next) {
                record_cycle(cycles, next, path);
                continue;
            }
            match edge {
                Edge::Includes => self.collect_triggers(next, level, tagged, path, out, cycles),
                Edge::Inherits => self.collect_triggers(next, level + 1, true, path, out, cycles),
            }
        }

        if tagged {
            out.extend(current.own_patterns().map(|p| format!("{{inherits={level}}}{p}")));
        } else {
            out.extend(current.own_patterns().map(str::to_string));
        }
        path.pop();
    }

    /// `topic` followed by every topic reachable through its edges, in order of
    /// first discovery. Used to gather `%Previous` candidates.
    pub fn topic_tree(&self, topic: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.walk_tree(topic, &mut seen, &mut out);
        out
    }

    fn walk_tree(&self, topic: &str, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        if !seen.insert(topic.to_string()) {
            return;
        }
        out.push(topic.to_string());
        if let Some(current) = self.get(topic) {
            for (_, next) in current.edges() {
                self.walk_tree(next, seen, out);
            }
        }
    }

    /// Locate the trigger for `pattern` among the topics `topic` inherits or
    /// includes, depth first, inherits before includes.
    pub fn find_inherited(&self, topic: &str, pattern: &str) -> Option<&Trigger> {
        let mut path = Vec::new();
        self.find_in_family(topic, pattern, &mut path)
    }

    fn find_in_family(&self, topic: &str, pattern: &str, path: &mut Vec<String>) -> Option<&Trigger> {
        let current = self.get(topic)?;
        path.push(topic.to_string());

        let order = current.inherits.iter().chain(current.includes.iter());
        let mut found = None;
        for next in order {
            if path.iter().any(|p| p == next) {
                continue;
            }
            let Some(owner) = self.get(next) else { continue };
            if let Some(trigger) = owner.trigger(pattern) {
                found = Some(trigger);
                break;
            }
            if let Some(trigger) = self.find_in_family(next, pattern, path) {
                found = Some(trigger);
                break;
            }
        }

        path.pop();
        found
    }
}

impl Topic {
    fn edges(&self) -> impl Iterator<Item = (Edge, &str)> {
        let includes = self.includes.iter().map(|t| (Edge::Includes, t.as_str()));
        let inherits = self.inherits.iter().map(|t| (Edge::Inherits, t.as_str()));
        includes.chain(inherits)
    }
}

fn record_cycle(cycles: &mut Vec<Cycle>, topic: &str, path: &[String]) {
    if cycles.iter().any(|c| c.topic == topic) {
        return;
    }
    let mut chain = path.to_vec();
    chain.push(topic.to_string());
    warn!(topic, chain = %chain.join(" -> "), "cyclic topic chain, edge skipped");
    cycles.push(Cycle { topic: topic.to_string(), path: chain });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(topics: &[(&str, &[&str])]) -> TopicGraph {
        let mut graph = TopicGraph::default();
        for (name, patterns) in topics {
            let topic = graph.topic_mut(name);
            for pattern in *patterns {
                topic.trigger_mut(pattern).replies.push(format!("{name}: {pattern}"));
            }
        }
        graph
    }

    #[test]
    fn redeclaring_a_pattern_appends_to_the_same_trigger() {
        let mut graph = TopicGraph::default();
        graph.topic_mut("random").trigger_mut("hello").replies.push("hi".into());
        graph.topic_mut("random").trigger_mut("hello").replies.push("hey".into());
        let topic = graph.get("random").unwrap();
        assert_eq!(topic.triggers().count(), 1);
        assert_eq!(topic.trigger("hello").unwrap().replies, vec!["hi", "hey"]);
    }

    #[test]
    fn inherited_patterns_are_tagged_by_depth() {
        let mut graph = graph_with(&[("child", &["own"]), ("parent", &["hello"]), ("grand", &["old"])]);
        graph.topic_mut("child").inherits.push("parent".into());
        graph.topic_mut("parent").inherits.push("grand".into());

        let mut cycles = Vec::new();
        let triggers = graph.topic_triggers("child", &mut cycles);
        assert_eq!(triggers, vec!["{inherits=2}old", "{inherits=1}hello", "{inherits=0}own"]);
        assert!(cycles.is_empty());
    }

    #[test]
    fn included_patterns_stay_untagged() {
        let mut graph = graph_with(&[("main", &["a"]), ("extra", &["b"])]);
        graph.topic_mut("main").includes.push("extra".into());

        let mut cycles = Vec::new();
        assert_eq!(graph.topic_triggers("main", &mut cycles), vec!["b", "a"]);
    }

    #[test]
    fn topic_tree_lists_first_discovery_once() {
        let mut graph = graph_with(&[("a", &[]), ("b", &[]), ("c", &[])]);
        graph.topic_mut("a").includes.push("b".into());
        graph.topic_mut("a").inherits.push("c".into());
        graph.topic_mut("b").inherits.push("c".into());
        assert_eq!(graph.topic_tree("a"), vec!["a", "b", "c"]);
    }

    #[test]
    fn cycles_are_reported_not_followed() {
        let mut graph = graph_with(&[("a", &["x"]), ("b", &["y"])]);
        graph.topic_mut("a").inherits.push("b".into());
        graph.topic_mut("b").inherits.push("a".into());

        let mut cycles = Vec::new();
        let triggers = graph.topic_triggers("a", &mut cycles);
        assert_eq!(triggers.len(), 2);
        assert_eq!(cycles, vec![Cycle { topic: "a".into(), path: vec!["a".into(), "b".into(), "a".into()] }]);
        assert!(graph.find_inherited("a", "nothing").is_none());
        assert_eq!(graph.topic_tree("a"), vec!["a", "b"]);
    }

    #[test]
    fn find_inherited_prefers_inherits_over_includes() {
        let mut graph = graph_with(&[("child", &[]), ("inc", &["hello"]), ("par", &["hello"])]);
        graph.topic_mut("child").includes.push("inc".into());
        graph.topic_mut("child").inherits.push("par".into());
        assert_eq!(graph.find_inherited("child", "hello").map(|t| t.topic.as_str()), Some("par"));
    }

    #[test]
    fn previous_twins_are_kept_out_of_the_match_list() {
        let mut graph = TopicGraph::default();
        let topic = graph.topic_mut("random");
        topic.trigger_mut("yes{previous}are you well").replies.push("good".into());
        topic.trigger_mut("yes").has_previous = true;
        topic.trigger_mut("no").replies.push("ok".into());
        topic.index_previous();

        let mut cycles = Vec::new();
        assert_eq!(graph.topic_triggers("random", &mut cycles), vec!["no"]);
        let topic = graph.get("random").unwrap();
        let previous: Vec<_> = topic.previous().collect();
        assert_eq!(previous, vec![("are you well", &["yes".to_string()][..])]);
    }

    #[test]
    fn link_creates_missing_targets() {
        let mut graph = TopicGraph::default();
        graph.topic_mut("a").inherits.push("ghost".into());
        graph.link();
        assert!(graph.exists("ghost"));
        assert_eq!(graph.len(), 2);
    }
}
