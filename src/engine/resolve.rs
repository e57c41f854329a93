//! Dialogue engine.
//!
//! A [`Resolver`] answers one turn for one user. It holds the user's session
//! for the whole turn and an `Arc` to the brain snapshot that was live when
//! the turn started (refreshed only when the turn itself publishes, through
//! `{!code}` or a learned `<set>`).
//!
//! ## One resolution step
//!
//! ```text
//! message ──> topic check ──> depth check ──> %Previous (step 0 only)
//!                                                   │ miss
//!                                                   v
//!                                        sorted scan, first match wins
//!                                                   │
//!                    ┌──────────────────────────────┤
//!                    v                              v
//!          knowledge search (persistent)     learn (non-persistent)
//!                    │ miss                         │
//!                    └──────────────┬───────────────┘
//!                                   v
//!                       conditions ──> weighted pool ──> redirect (step + 1)
//!                                   │
//!                                   v
//!                              tag processing
//! ```
//!
//! A turn runs the BEGIN topic first when the script has one. Its reply wraps
//! the normal reply through the `{ok}` placeholder.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::brain::{Brain, Engine};
use super::metrics::{ReplyStep, ReplyTrace};
use super::topics::{PREVIOUS_MARKER, Trigger};
use crate::external::Language;
use crate::session::LAST_MATCH_VAR;
use crate::{BEGIN_TOPIC, DEFAULT_TOPIC, ERR_DEEP_RECURSION, ERR_NO_MATCH, ERR_NO_REPLY, Session, UNDEFINED};

/// Largest `{weight=N}` honoured on a reply or redirect.
const MAX_CHOICE_WEIGHT: u64 = u32::MAX as u64;

/// Stars captured by the matched trigger and by its `%Previous` pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MatchContext {
    pub stars: Vec<String>,
    pub botstars: Vec<String>,
}

struct Found<'b> {
    trigger: &'b Trigger,
    pattern: String,
    ctx: MatchContext,
    via_previous: bool,
}

enum Choice {
    Redirect(String),
    Reply(String),
}

pub(crate) struct Resolver<'a> {
    pub(super) engine: &'a Engine,
    pub(super) brain: Arc<Brain>,
    pub(super) user: &'a str,
    pub(super) session: &'a mut Session,
    pub(super) trace: ReplyTrace,
}

impl<'a> Resolver<'a> {
    pub fn new(engine: &'a Engine, user: &'a str, session: &'a mut Session) -> Self {
        Resolver { engine, brain: engine.snapshot(), user, session, trace: ReplyTrace::default() }
    }

    /// Answer `message` and record the exchange in the session history.
    pub fn reply(mut self, message: &str) -> (String, ReplyTrace) {
        let started = Instant::now();
        let message = self.brain.format_message(message);
        debug!(user = self.user, %message, "reply");

        let reply = if self.brain.graph.exists(BEGIN_TOPIC) {
            let begin = self.resolve("request", true, 0);
            let combined = if begin.contains("{ok}") {
                let reply = self.resolve(&message, false, 0);
                begin.replace("{ok}", &reply)
            } else {
                begin
            };
            self.process_tags(&combined, &MatchContext::default(), 0)
        } else {
            self.resolve(&message, false, 0)
        };

        self.session.push_history(message, reply.clone());
        self.trace.total = started.elapsed();
        (reply, self.trace)
    }

    /// Refresh the snapshot after this turn published a new one.
    pub(super) fn refresh(&mut self) {
        self.brain = self.engine.snapshot();
    }

    /// One resolution step.
    pub(super) fn resolve(&mut self, message: &str, begin: bool, step: usize) -> String {
        let brain = Arc::clone(&self.brain);

        let mut topic = self.session.topic().to_string();
        if !brain.graph.exists(&topic) && topic != DEFAULT_TOPIC {
            warn!(user = self.user, %topic, "user is in an empty topic, returning to {DEFAULT_TOPIC}");
            topic = DEFAULT_TOPIC.to_string();
            self.session.set_topic(DEFAULT_TOPIC);
        }

        if step > brain.depth {
            warn!(user = self.user, step, depth = brain.depth, "deep recursion");
            return ERR_DEEP_RECURSION.to_string();
        }

        if begin {
            topic = BEGIN_TOPIC.to_string();
        }

        let found = if step == 0 { self.match_previous(&brain, &topic, message) } else { None };
        let found = found.or_else(|| self.match_sorted(&brain, &topic, message));

        let Some(found) = found else {
            debug!(%topic, %message, "no trigger matched");
            self.session.set(LAST_MATCH_VAR, "");
            self.trace.record(ReplyStep { step, topic, message: message.to_string(), begin, ..Default::default() });
            return ERR_NO_MATCH.to_string();
        };

        let trigger = found.trigger;
        let ctx = found.ctx;
        debug!(%topic, pattern = %found.pattern, stars = ?ctx.stars, "matched");
        self.session.set(LAST_MATCH_VAR, found.pattern.clone());
        self.trace.record(ReplyStep {
            step,
            topic,
            message: message.to_string(),
            matched: Some(found.pattern),
            owner: Some(trigger.topic.clone()),
            via_previous: found.via_previous,
            begin,
        });

        if trigger.persistent && trigger.has_knowledge_search() {
            let declared: Vec<&str> = trigger.actions.iter().map(|a| a.content.as_str()).collect();
            debug!(actions = ?declared, "knowledge search");
            if let Some(answer) = self.knowledge_search(message, &ctx.stars) {
                return answer;
            }
        }
        if !trigger.persistent {
            self.learn(trigger, &ctx.stars);
        }

        let mut reply = self.check_conditions(trigger, &ctx, step);
        if reply.is_empty() {
            match self.choose(trigger) {
                Some(Choice::Redirect(target)) => {
                    self.trace.redirects += 1;
                    let target = self.process_tags(&target, &ctx, step);
                    let target = self.brain.format_message(&target);
                    debug!(%target, "redirect");
                    return self.resolve(&target, begin, step + 1);
                }
                Some(Choice::Reply(text)) => reply = text,
                None => {}
            }
        }

        if reply.is_empty() {
            warn!(pattern = %trigger.pattern, "trigger has nothing to say");
            return ERR_NO_REPLY.to_string();
        }

        if begin { self.begin_tags(&reply) } else { self.process_tags(&reply, &ctx, step) }
    }

    // --- Matching ----------------------------------------------------------

    fn match_previous<'b>(&self, brain: &'b Brain, topic: &str, message: &str) -> Option<Found<'b>> {
        let last_reply = brain.format_message(self.session.reply(1));

        for name in brain.graph.topic_tree(topic) {
            let Some(family) = brain.graph.get(&name) else { continue };
            if !family.has_previous() {
                continue;
            }

            for (previous, candidates) in family.previous() {
                let Some(botstars) = self.engine.match_pattern(brain, self.session, previous, last_reply.trim()) else {
                    continue;
                };
                debug!(topic = %name, previous, "previous reply matched");

                for candidate in candidates {
                    let Some(stars) = self.engine.match_pattern(brain, self.session, candidate, message) else {
                        continue;
                    };
                    let key = format!("{candidate}{PREVIOUS_MARKER}{previous}");
                    if let Some(trigger) = family.trigger(&key) {
                        return Some(Found {
                            trigger,
                            pattern: candidate.clone(),
                            ctx: MatchContext { stars, botstars },
                            via_previous: true,
                        });
                    }
                }
            }
        }
        None
    }

    fn match_sorted<'b>(&self, brain: &'b Brain, topic: &str, message: &str) -> Option<Found<'b>> {
        let owner = brain.graph.get(topic)?;

        for pattern in owner.sorted() {
            let Some(stars) = self.engine.match_pattern(brain, self.session, pattern, message) else {
                continue;
            };
            let trigger = owner.trigger(pattern).or_else(|| brain.graph.find_inherited(topic, pattern));
            let Some(trigger) = trigger else {
                warn!(topic, pattern, "matched pattern has no trigger");
                return None;
            };
            return Some(Found {
                trigger,
                pattern: pattern.clone(),
                ctx: MatchContext { stars, botstars: Vec::new() },
                via_previous: false,
            });
        }
        None
    }

    // --- Knowledge and learning --------------------------------------------

    fn session_language(&self) -> Language {
        match self.session.get("language") {
            UNDEFINED => self.brain.language.clone(),
            lang => Language::new(lang),
        }
    }

    /// Store lookup, then the knowledge provider. `None` falls through to the normal reply path.
    fn knowledge_search(&mut self, message: &str, stars: &[String]) -> Option<String> {
        let collaborators = &self.engine.collaborators;

        if let Some(store) = &collaborators.store {
            if let Some(hit) = store.find(message, stars).filter(|h| !h.is_empty()) {
                debug!(%message, "answered from memory");
                return Some(hit);
            }
        }

        let provider = collaborators.knowledge.as_ref()?;
        let ours = self.session_language();
        let theirs = provider.language();
        let translator = collaborators.translator.as_ref().filter(|_| ours != theirs);

        let question = match translator {
            Some(t) => t.translate(message, &theirs),
            None => message.to_string(),
        };
        let answer = provider.answer(&question).filter(|a| !a.trim().is_empty())?;
        let answer = match translator {
            Some(t) => t.translate(&answer, &ours),
            None => answer,
        };

        info!(%message, "answered by knowledge provider");
        if let Some(store) = &collaborators.store {
            store.save(message, &answer, &collaborators.extractor.keywords(message));
        }
        Some(answer)
    }

    /// Harvest `<set>` tags of a learned trigger into bot variables and save
    /// the resulting subject/definition pair.
    fn learn(&mut self, trigger: &Trigger, stars: &[String]) {
        let Some(template) = trigger.replies.first() else { return };

        let mut text = template.replace("<star>", stars.first().map_or(UNDEFINED, String::as_str));
        for (i, star) in stars.iter().enumerate() {
            text = text.replace(&format!("<star{}>", i + 1), star);
        }

        let learned: Vec<(String, String)> = regex!(r"<set (.+?)=(.+?)>")
            .captures_iter(&text)
            .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
            .collect();
        if learned.is_empty() {
            return;
        }

        self.engine.update(|brain| {
            for (name, value) in &learned {
                brain.set_variable(name, Some(value.as_str()));
            }
        });
        self.refresh();
        info!(vars = learned.len(), "learned bot variables");

        let subject = self.brain.defs.var("subject").map(str::to_string);
        let definition = self.brain.defs.var("definition").map(str::to_string);
        let collaborators = &self.engine.collaborators;
        if let (Some(store), Some(subject), Some(definition)) = (&collaborators.store, subject, definition) {
            let tags = collaborators.extractor.keywords(&format!("{subject} {definition}"));
            store.save(&subject, &definition, &tags);
        }
    }

    // --- Conditions and choice ---------------------------------------------

    fn check_conditions(&mut self, trigger: &Trigger, ctx: &MatchContext, step: usize) -> String {
        let clause = regex!(r"^(.+?)\s+(==|eq|startsWith|!=|ne|<>|<|<=|>|>=)\s+(.+?)$");

        for condition in &trigger.conditions {
            let mut halves = regex!(r"\s*=>\s*").splitn(condition, 2);
            let (Some(test), Some(outcome)) = (halves.next(), halves.next()) else {
                warn!(condition, "condition without =>");
                continue;
            };
            let Some(caps) = clause.captures(test.trim()) else {
                warn!(condition, "malformed condition");
                continue;
            };

            let left = self.process_tags(&caps[1], ctx, step + 1);
            let right = self.process_tags(&caps[3], ctx, step + 1);
            let left = if left.is_empty() { UNDEFINED.to_string() } else { left };
            let right = if right.is_empty() { UNDEFINED.to_string() } else { right };

            let passed = compare(&left, &caps[2], &right);
            debug!(%left, op = &caps[2], %right, passed, "condition");
            if passed {
                return outcome.trim().to_string();
            }
        }
        String::new()
    }

    fn choose(&self, trigger: &Trigger) -> Option<Choice> {
        let weight_tag = regex!(r"\{weight=(\d+)\}");
        // Digits too long for u64 count as the ceiling.
        let weight = |text: &str| {
            weight_tag
                .captures(text)
                .map(|caps| caps[1].parse::<u64>().unwrap_or(u64::MAX))
                .unwrap_or(1)
                .clamp(1, MAX_CHOICE_WEIGHT)
        };

        let entries: Vec<(bool, usize)> = (0..trigger.redirects.len())
            .map(|i| (true, i))
            .chain((0..trigger.replies.len()).map(|i| (false, i)))
            .collect();
        let weights: Vec<u64> = entries
            .iter()
            .map(|&(redirect, i)| weight(if redirect { trigger.redirects[i].as_str() } else { trigger.replies[i].as_str() }))
            .collect();

        let (redirect, i) = entries[self.engine.pick_weighted(&weights)?];
        debug!(choices = entries.len(), total = weights.iter().sum::<u64>(), redirect, index = i, "chose");
        if redirect {
            Some(Choice::Redirect(weight_tag.replace_all(&trigger.redirects[i], "").trim().to_string()))
        } else {
            Some(Choice::Reply(trigger.replies[i].clone()))
        }
    }
}

/// Evaluate one condition clause. Text comparison first, then integers.
fn compare(left: &str, op: &str, right: &str) -> bool {
    match op {
        "eq" | "==" if left == right => return true,
        "ne" | "!=" | "<>" if left != right => return true,
        "startsWith" => return left.starts_with(right),
        _ => {}
    }

    let (Ok(a), Ok(b)) = (left.trim().parse::<i64>(), right.trim().parse::<i64>()) else {
        return false;
    };
    match op {
        "==" => a == b,
        "!=" | "<>" => a != b,
        "<" => a < b,
        "<=" => a <= b,
        ">" => a > b,
        ">=" => a >= b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::compare;

    #[test]
    fn text_comparison_comes_first() {
        assert!(compare("bob", "eq", "bob"));
        assert!(compare("bob", "==", "bob"));
        assert!(compare("bob", "ne", "alice"));
        assert!(compare("undefined", "<>", "bob"));
        assert!(compare("hello world", "startsWith", "hello"));
        assert!(!compare("bob", "eq", "alice"));
    }

    #[test]
    fn numbers_compare_as_integers() {
        assert!(compare("05", "==", "5"));
        assert!(compare("10", ">", "9"));
        assert!(compare("3", "<=", "3"));
        assert!(!compare("10", "<", "9"));
        assert!(!compare("ten", ">", "9"));
        assert!(!compare("5", "eq", "05"));
    }
}
