//! Per-user conversational state.
//!
//! A [`Session`] is the variable bag plus the bounded input/reply history of
//! one user. Sessions are created on first reference by the [`SessionStore`]
//! and live as long as the interpreter does.
//!
//! ## Invariants
//!
//! - The variable bag always holds a `topic` key (default `"random"`).
//! - History index 1 is the most recent entry; anything out of range reads as
//!   the literal `"undefined"`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::UNDEFINED;

/// Topic every session starts in.
pub const DEFAULT_TOPIC: &str = "random";

/// Default number of inputs/replies remembered per session.
pub const DEFAULT_HISTORY_SIZE: usize = 9;

/// Session variable that records the last matched trigger pattern.
pub(crate) const LAST_MATCH_VAR: &str = "__lastmatch__";

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    vars: HashMap<String, String>,
    inputs: VecDeque<String>,
    replies: VecDeque<String>,
    history_size: usize,
}

impl Session {
    pub fn new(id: impl Into<String>, history_size: usize) -> Self {
        let mut vars = HashMap::new();
        vars.insert("topic".to_string(), DEFAULT_TOPIC.to_string());
        Session { id: id.into(), vars, inputs: VecDeque::new(), replies: VecDeque::new(), history_size }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read a variable, `"undefined"` when unset.
    pub fn get(&self, name: &str) -> &str {
        self.vars.get(name).map(String::as_str).unwrap_or(UNDEFINED)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Remove a variable. Removing `topic` puts the session back in the default topic.
    pub fn delete(&mut self, name: &str) {
        if name == "topic" {
            self.set_topic(DEFAULT_TOPIC);
        } else {
            self.vars.remove(name);
        }
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    /// Replace the whole variable bag, keeping the `topic` invariant.
    pub fn replace_vars(&mut self, vars: HashMap<String, String>) {
        self.vars = vars;
        self.vars.entry("topic".to_string()).or_insert_with(|| DEFAULT_TOPIC.to_string());
    }

    pub fn topic(&self) -> &str {
        self.get("topic")
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.vars.insert("topic".to_string(), topic.into());
    }

    /// The `index`-th most recent user input (1-based).
    pub fn input(&self, index: usize) -> &str {
        history_entry(&self.inputs, index)
    }

    /// The `index`-th most recent bot reply (1-based).
    pub fn reply(&self, index: usize) -> &str {
        history_entry(&self.replies, index)
    }

    /// Record a finished turn, dropping the oldest entries past the history bound.
    pub fn push_history(&mut self, input: impl Into<String>, reply: impl Into<String>) {
        self.inputs.push_front(input.into());
        self.replies.push_front(reply.into());
        self.inputs.truncate(self.history_size);
        self.replies.truncate(self.history_size);
    }
}

fn history_entry(history: &VecDeque<String>, index: usize) -> &str {
    index.checked_sub(1).and_then(|i| history.get(i)).map(String::as_str).unwrap_or(UNDEFINED)
}

/// Owner of every session, keyed by user id.
///
/// Each session sits behind its own mutex: holding it for a whole turn
/// serializes concurrent calls for the same user while other users proceed.
#[derive(Debug)]
pub(crate) struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    history_size: usize,
}

impl SessionStore {
    pub fn new(history_size: usize) -> Self {
        SessionStore { sessions: Mutex::new(HashMap::new()), history_size }
    }

    /// Fetch the session for `user`, creating it on first reference.
    pub fn session(&self, user: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock();
        sessions.entry(user.to_string()).or_insert_with(|| Arc::new(Mutex::new(Session::new(user, self.history_size)))).clone()
    }

    /// Fetch the session for `user` without creating it.
    pub fn existing(&self, user: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().get(user).cloned()
    }

    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.lock().keys().cloned().collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_in_random_topic() {
        let session = Session::new("alice", DEFAULT_HISTORY_SIZE);
        assert_eq!(session.topic(), "random");
        assert_eq!(session.get("name"), "undefined");
    }

    #[test]
    fn history_is_most_recent_first_and_bounded() {
        let mut session = Session::new("alice", 2);
        session.push_history("one", "reply one");
        session.push_history("two", "reply two");
        session.push_history("three", "reply three");

        assert_eq!(session.input(1), "three");
        assert_eq!(session.input(2), "two");
        assert_eq!(session.input(3), "undefined");
        assert_eq!(session.reply(1), "reply three");
        assert_eq!(session.reply(0), "undefined");
    }

    #[test]
    fn replacing_vars_keeps_a_topic() {
        let mut session = Session::new("alice", DEFAULT_HISTORY_SIZE);
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        session.replace_vars(vars);

        assert_eq!(session.topic(), "random");
        assert_eq!(session.get("name"), "Alice");

        session.delete("topic");
        assert_eq!(session.topic(), "random");
    }

    #[test]
    fn store_hands_out_the_same_session() {
        let store = SessionStore::new(DEFAULT_HISTORY_SIZE);
        store.session("bob").lock().set("mood", "happy");
        assert_eq!(store.session("bob").lock().get("mood"), "happy");
        assert!(store.existing("carol").is_none());
        assert_eq!(store.users(), vec!["bob".to_string()]);
    }
}
