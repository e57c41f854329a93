//! Trigger sorting.
//!
//! The match loop takes the **first** pattern that accepts a message, so the
//! order built here is the whole ranking mechanism. Sorting happens per topic
//! on the flattened, `{inherits=N}`-tagged pattern list produced by
//! `TopicGraph::topic_triggers`.
//!
//! ## Ordering
//!
//! ```text
//! inherit level   -1 (untagged), 0, 1, ...          ascending
//!   weight        {weight=K}, default 0              descending
//!     bucket      atomic, optional, alpha, number, star,
//!                 then bare `_`, bare `#`, bare `*`
//!       words     word count                         descending
//!         ties    input order
//! ```
//!
//! A pattern lands in the first bucket whose character it contains, checked
//! in the order `_`, `#`, `*`, `[`. Anything else is atomic.

use std::collections::{BTreeMap, HashSet};

bitflags::bitflags! {
    /// Wildcard and optional markers present in a raw pattern.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct PatternShape: u8 {
        const ALPHA    = 1 << 0;
        const NUMBER   = 1 << 1;
        const STAR     = 1 << 2;
        const OPTIONAL = 1 << 3;
    }
}

impl PatternShape {
    pub fn scan(pattern: &str) -> Self {
        let mut shape = PatternShape::empty();
        for c in pattern.chars() {
            match c {
                '_' => shape |= PatternShape::ALPHA,
                '#' => shape |= PatternShape::NUMBER,
                '*' => shape |= PatternShape::STAR,
                '[' => shape |= PatternShape::OPTIONAL,
                _ => {}
            }
        }
        shape
    }
}

/// Number of words left after splitting on spaces, pipes and wildcard characters.
pub(crate) fn word_count(pattern: &str) -> usize {
    pattern.split([' ', '|', '*', '#', '_']).filter(|w| !w.is_empty()).count()
}

/// Sort buckets for one weight group.
#[derive(Debug, Default)]
struct Buckets {
    atomic: BTreeMap<usize, Vec<String>>,
    option: BTreeMap<usize, Vec<String>>,
    alpha: BTreeMap<usize, Vec<String>>,
    number: BTreeMap<usize, Vec<String>>,
    wild: BTreeMap<usize, Vec<String>>,
    under: Vec<String>,
    pound: Vec<String>,
    star: Vec<String>,
}

impl Buckets {
    fn add(&mut self, pattern: String) {
        let words = word_count(&pattern);
        let shape = PatternShape::scan(&pattern);

        let (counted, single) = if shape.contains(PatternShape::ALPHA) {
            (&mut self.alpha, &mut self.under)
        } else if shape.contains(PatternShape::NUMBER) {
            (&mut self.number, &mut self.pound)
        } else if shape.contains(PatternShape::STAR) {
            (&mut self.wild, &mut self.star)
        } else if shape.contains(PatternShape::OPTIONAL) {
            self.option.entry(words).or_default().push(pattern);
            return;
        } else {
            self.atomic.entry(words).or_default().push(pattern);
            return;
        };

        if words > 0 {
            counted.entry(words).or_default().push(pattern);
        } else {
            single.push(pattern);
        }
    }

    fn drain_into(self, out: &mut Vec<String>) {
        for counted in [self.atomic, self.option, self.alpha, self.number, self.wild] {
            for (_, patterns) in counted.into_iter().rev() {
                out.extend(patterns);
            }
        }
        out.extend(self.under);
        out.extend(self.pound);
        out.extend(self.star);
    }
}

/// Build the match order for a flattened pattern list.
///
/// `{inherits=N}` tags are consumed; `{weight=K}` tags stay on the returned
/// patterns because they are part of the trigger's key. Duplicates (a pattern
/// reachable through two edges) keep their first position.
pub(crate) fn sort_triggers(patterns: &[String]) -> Vec<String> {
    let inherits_tag = regex!(r"\{inherits=(\d+)\}");
    let weight_tag = regex!(r"\{weight=(\d+)\}");

    let mut heritage: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for pattern in patterns {
        let level = inherits_tag
            .captures(pattern)
            .and_then(|caps| caps[1].parse::<i64>().ok())
            .unwrap_or(-1);
        let stripped = inherits_tag.replace_all(pattern, "").into_owned();
        heritage.entry(level).or_default().push(stripped);
    }

    let mut sorted = Vec::with_capacity(patterns.len());
    for (level, group) in heritage {
        tracing::trace!(level, count = group.len(), "sorting inherit level");

        let mut weights: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for pattern in group {
            let weight = weight_tag
                .captures_iter(&pattern)
                .last()
                .and_then(|caps| caps[1].parse::<u32>().ok())
                .unwrap_or(0);
            weights.entry(weight).or_default().push(pattern);
        }

        for (_, group) in weights.into_iter().rev() {
            let mut buckets = Buckets::default();
            for pattern in group {
                buckets.add(pattern);
            }
            buckets.drain_into(&mut sorted);
        }
    }

    let mut seen = HashSet::new();
    sorted.retain(|p| seen.insert(p.clone()));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort(patterns: &[&str]) -> Vec<String> {
        let owned: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        sort_triggers(&owned)
    }

    #[test]
    fn shape_scan_flags() {
        assert_eq!(PatternShape::scan("hello"), PatternShape::empty());
        assert_eq!(PatternShape::scan("i am # years [old]"), PatternShape::NUMBER | PatternShape::OPTIONAL);
        assert_eq!(PatternShape::scan("_ *"), PatternShape::ALPHA | PatternShape::STAR);
    }

    #[test]
    fn word_count_ignores_wildcards() {
        assert_eq!(word_count("*"), 0);
        assert_eq!(word_count("my name is *"), 3);
        assert_eq!(word_count("i am #_years"), 3);
        assert_eq!(word_count("[a|b] c"), 3);
    }

    #[test]
    fn atomic_beats_catch_all() {
        assert_eq!(sort(&["*", "cat"]), vec!["cat", "*"]);
    }

    #[test]
    fn bucket_order_is_atomic_optional_alpha_number_star_then_singletons() {
        let sorted = sort(&["*", "#", "_", "* dogs", "# dogs", "_ dogs", "[big] dogs", "dogs"]);
        assert_eq!(sorted, vec!["dogs", "[big] dogs", "_ dogs", "# dogs", "* dogs", "_", "#", "*"]);
    }

    #[test]
    fn more_words_sort_first_and_ties_keep_input_order() {
        let sorted = sort(&["hi", "hello there", "hey", "good day to you"]);
        assert_eq!(sorted, vec!["good day to you", "hello there", "hi", "hey"]);
    }

    #[test]
    fn weight_outranks_specificity() {
        let sorted = sort(&["hello bot", "*{weight=10}", "hi{weight=5}"]);
        assert_eq!(sorted, vec!["*{weight=10}", "hi{weight=5}", "hello bot"]);
    }

    #[test]
    fn inherit_levels_sort_ascending_with_untagged_first() {
        let sorted = sort(&["{inherits=1}hello", "{inherits=0}*", "plain"]);
        assert_eq!(sorted, vec!["plain", "*", "hello"]);
    }

    #[test]
    fn sorting_is_deterministic_and_deduplicated() {
        let input = ["a *", "b", "{inherits=0}b", "* c", "_", "[x] y", "a *"];
        let first = sort(&input);
        let second = sort(&input);
        assert_eq!(first, second);
        assert_eq!(first, vec!["b", "[x] y", "a *", "* c", "_"]);
    }
}
