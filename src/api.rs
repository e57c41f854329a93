use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{Engine, ParseReport, ReplyStep, ReplyTrace, Resolver};
use crate::error::{LoadError, ParseError, Result};
use crate::external::{KeywordExtractor, KnowledgeProvider, LongTermStore, ObjectHandler, Translator};
use crate::session::{DEFAULT_HISTORY_SIZE, LAST_MATCH_VAR, SessionStore};

/// Interpreter settings.
#[derive(Debug, Clone)]
pub struct Options {
    /// Deepest redirect nesting before a reply gives up. `! global depth`
    /// overrides it per script.
    pub depth: usize,
    /// Number of past inputs and replies kept per user.
    pub history_size: usize,
    /// Seed for reply choice and `{random}`. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// File extensions `load_directory` picks up, without the dot.
    pub extensions: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options { depth: 50, history_size: DEFAULT_HISTORY_SIZE, seed: None, extensions: vec!["rive".to_string()] }
    }
}

/// Result from [`Interpreter::reply_verbose`].
#[derive(Debug, Clone)]
pub struct ReplyResult {
    pub reply: String,
    pub details: ReplyDetails,
}

/// How a reply was reached.
#[derive(Debug, Clone)]
pub struct ReplyDetails {
    /// The user's topic when the turn started.
    pub starting_topic: String,
    /// Raw pattern of the trigger that answered the message itself.
    pub matched: Option<String>,
    /// Topic owning that trigger.
    pub topic: Option<String>,
    pub via_previous: bool,
    /// Deepest redirect step reached.
    pub depth: usize,
    pub redirects: usize,
    pub elapsed: Duration,
    /// Every resolution step in the order it ran.
    pub steps: Vec<ReplyStep>,
}

/// One topic's match order, for dumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDump {
    pub name: String,
    pub includes: Vec<String>,
    pub inherits: Vec<String>,
    /// Patterns in the order they are tried.
    pub triggers: Vec<String>,
}

/// A loaded bot.
///
/// Scripts are loaded into a staging area and become visible to replies on
/// [`sort_replies`](Self::sort_replies). The interpreter is `Send + Sync`:
/// share it behind an `Arc` to answer many users at once.
///
/// # Example
/// ```
/// use colloquy::{Interpreter, Options};
///
/// let bot = Interpreter::new(Options::default());
/// bot.stream("+ what is my name\n- Your name is <get name>.\n+ call me *\n- <set name=<formal>>OK, <get name>.").unwrap();
/// bot.sort_replies().unwrap();
///
/// assert_eq!(bot.reply("u1", "call me kim"), "OK, Kim.");
/// assert_eq!(bot.reply("u1", "what is my name"), "Your name is Kim.");
/// ```
pub struct Interpreter {
    engine: Engine,
    sessions: SessionStore,
    options: Options,
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new(Options::default())
    }
}

impl Interpreter {
    pub fn new(options: Options) -> Self {
        Interpreter {
            engine: Engine::new(options.depth, options.seed),
            sessions: SessionStore::new(options.history_size),
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    // --- Collaborators -----------------------------------------------------

    /// Register the runtime for `> object NAME LANGUAGE` blocks. Register
    /// handlers before loading the scripts that use them.
    pub fn set_handler(&mut self, language: &str, handler: Arc<dyn ObjectHandler>) {
        self.engine.collaborators.handlers.insert(language.to_lowercase(), handler);
    }

    pub fn set_store(&mut self, store: Arc<dyn LongTermStore>) {
        self.engine.collaborators.store = Some(store);
    }

    pub fn set_knowledge(&mut self, provider: Arc<dyn KnowledgeProvider>) {
        self.engine.collaborators.knowledge = Some(provider);
    }

    pub fn set_translator(&mut self, translator: Arc<dyn Translator>) {
        self.engine.collaborators.translator = Some(translator);
    }

    pub fn set_extractor(&mut self, extractor: Arc<dyn KeywordExtractor>) {
        self.engine.collaborators.extractor = extractor;
    }

    // --- Loading -----------------------------------------------------------

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ParseReport> {
        let path = path.as_ref();
        let code = fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
        Ok(self.engine.load(&path.display().to_string(), &code)?)
    }

    /// Load every script in `dir` whose extension is listed in
    /// [`Options::extensions`], in file name order.
    ///
    /// Files that cannot be read or declare an unsupported version are
    /// logged and skipped.
    pub fn load_directory(&self, dir: impl AsRef<Path>) -> Result<Vec<ParseReport>> {
        let dir = dir.as_ref();
        let io_err = |source| LoadError::Io { path: dir.to_path_buf(), source };

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let wanted = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| self.options.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
            if wanted && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        info!(dir = %dir.display(), files = paths.len(), "loading directory");

        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load_file(&path) {
                Ok(report) => reports.push(report),
                Err(err) => warn!(%err, "skipping script"),
            }
        }
        Ok(reports)
    }

    /// Parse in-memory script text.
    pub fn stream(&self, code: &str) -> std::result::Result<ParseReport, ParseError> {
        self.engine.load("(streamed)", code)
    }

    /// Sort everything loaded so far and make it live.
    ///
    /// A cyclic `includes`/`inherits` chain is returned as an error, but the
    /// bot is still published with the cyclic edge skipped.
    pub fn sort_replies(&self) -> Result<()> {
        let cycles = self.engine.publish();
        match cycles.into_iter().next() {
            Some(cycle) => Err(LoadError::InheritanceCycle { topic: cycle.topic, path: cycle.path }),
            None => Ok(()),
        }
    }

    // --- Conversation ------------------------------------------------------

    /// Answer `message` from `user`.
    pub fn reply(&self, user: &str, message: &str) -> String {
        self.turn(user, message).0
    }

    /// Answer `message` and report how the answer was reached.
    pub fn reply_verbose(&self, user: &str, message: &str) -> ReplyResult {
        let (reply, trace, starting_topic) = self.turn(user, message);
        let main = trace.main_match();

        let details = ReplyDetails {
            starting_topic,
            matched: main.and_then(|s| s.matched.clone()),
            topic: main.and_then(|s| s.owner.clone()),
            via_previous: main.is_some_and(|s| s.via_previous),
            depth: trace.deepest(),
            redirects: trace.redirects,
            elapsed: trace.total,
            steps: trace.steps,
        };
        ReplyResult { reply, details }
    }

    fn turn(&self, user: &str, message: &str) -> (String, ReplyTrace, String) {
        let session = self.sessions.session(user);
        let mut session = session.lock();
        let starting_topic = session.topic().to_string();

        let (reply, trace) = Resolver::new(&self.engine, user, &mut session).reply(message);
        (reply, trace, starting_topic)
    }

    // --- Definitions -------------------------------------------------------

    /// Set or delete (`None`) a global. Returns `false` when a special global
    /// (`depth`, `debug`) rejects the value.
    pub fn set_global(&self, name: &str, value: Option<&str>) -> bool {
        self.engine.update(|brain| brain.set_global(name, value))
    }

    pub fn set_variable(&self, name: &str, value: Option<&str>) {
        self.engine.update(|brain| brain.set_variable(name, value));
    }

    pub fn set_substitution(&self, pattern: &str, output: Option<&str>) {
        self.engine.update(|brain| brain.set_substitution(pattern, output));
    }

    pub fn set_person_substitution(&self, pattern: &str, output: Option<&str>) {
        self.engine.update(|brain| brain.set_person_substitution(pattern, output));
    }

    pub fn global(&self, name: &str) -> Option<String> {
        self.engine.snapshot().defs.global(name).map(str::to_string)
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.engine.snapshot().defs.var(name).map(str::to_string)
    }

    // --- Sessions ----------------------------------------------------------

    pub fn uservar(&self, user: &str, name: &str) -> Option<String> {
        self.sessions.existing(user)?.lock().vars().get(name).cloned()
    }

    /// Set or delete (`None`) a user variable.
    pub fn set_uservar(&self, user: &str, name: &str, value: Option<&str>) {
        let session = self.sessions.session(user);
        let mut session = session.lock();
        match value {
            Some(value) => session.set(name, value),
            None => session.delete(name),
        }
    }

    pub fn uservars(&self, user: &str) -> Option<HashMap<String, String>> {
        self.sessions.existing(user).map(|s| s.lock().vars().clone())
    }

    /// Replace every variable of `user`. A topic is kept even when `vars` has none.
    pub fn set_uservars(&self, user: &str, vars: HashMap<String, String>) {
        self.sessions.session(user).lock().replace_vars(vars);
    }

    /// Users that have a session, sorted.
    pub fn users(&self) -> Vec<String> {
        self.sessions.users()
    }

    /// Pattern of the trigger that answered the user's last message.
    pub fn last_match(&self, user: &str) -> Option<String> {
        self.uservar(user, LAST_MATCH_VAR).filter(|m| !m.is_empty())
    }

    // --- Introspection -----------------------------------------------------

    /// Every live topic with its match order, sorted by topic name.
    pub fn sorted_triggers(&self) -> Vec<TopicDump> {
        let brain = self.engine.snapshot();
        let mut dump: Vec<TopicDump> = brain
            .graph
            .iter()
            .map(|topic| TopicDump {
                name: topic.name.clone(),
                includes: topic.includes.clone(),
                inherits: topic.inherits.clone(),
                triggers: topic.sorted().to_vec(),
            })
            .collect();
        dump.sort_by(|a, b| a.name.cmp(&b.name));
        dump
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot(code: &str) -> Interpreter {
        let bot = Interpreter::new(Options { seed: Some(3), ..Options::default() });
        bot.stream(code).unwrap();
        bot.sort_replies().unwrap();
        bot
    }

    #[test]
    fn interpreter_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Interpreter>();
    }

    #[test]
    fn loading_is_staged_until_sorted() {
        let bot = Interpreter::default();
        bot.stream("+ hello\n- hi").unwrap();
        assert_eq!(bot.reply("u", "hello"), crate::ERR_NO_MATCH);
        bot.sort_replies().unwrap();
        assert_eq!(bot.reply("u", "hello"), "hi");
    }

    #[test]
    fn reply_verbose_reports_the_route() {
        let bot = bot("+ hi\n@ hello\n+ hello\n- Hello!");
        let res = bot.reply_verbose("u", "hi");

        assert_eq!(res.reply, "Hello!");
        assert_eq!(res.details.starting_topic, "random");
        assert_eq!(res.details.matched.as_deref(), Some("hi"));
        assert_eq!(res.details.topic.as_deref(), Some("random"));
        assert_eq!(res.details.redirects, 1);
        assert_eq!(res.details.depth, 1);
        assert_eq!(res.details.steps.len(), 2);
        assert!(res.details.elapsed >= Duration::ZERO);
    }

    #[test]
    fn uservars_round_trip_through_the_api() {
        let bot = bot("+ hi\n- hi <get name>");
        assert_eq!(bot.uservars("nobody"), None);

        bot.set_uservar("u", "name", Some("Sam"));
        assert_eq!(bot.reply("u", "hi"), "hi Sam");
        assert_eq!(bot.uservar("u", "name").as_deref(), Some("Sam"));
        assert_eq!(bot.last_match("u").as_deref(), Some("hi"));

        bot.set_uservars("u", HashMap::new());
        assert_eq!(bot.uservar("u", "topic").as_deref(), Some("random"));
        assert_eq!(bot.uservar("u", "name"), None);
        assert_eq!(bot.users(), vec!["u".to_string()]);
    }

    #[test]
    fn definitions_can_change_at_runtime() {
        let bot = bot("+ who are you\n- I am <bot name>.");
        assert_eq!(bot.reply("u", "who are you"), "I am undefined.");
        bot.set_variable("name", Some("Aiden"));
        assert_eq!(bot.variable("name").as_deref(), Some("Aiden"));
        assert_eq!(bot.reply("u", "who are you"), "I am Aiden.");

        assert!(!bot.set_global("depth", Some("lots")));
        assert!(bot.set_global("owner", Some("me")));
        assert_eq!(bot.global("owner").as_deref(), Some("me"));
    }

    #[test]
    fn cycles_are_errors_but_the_bot_still_works() {
        let bot = Interpreter::default();
        bot.stream("> topic a inherits b\n+ x\n- from a\n< topic\n> topic b inherits a\n+ y\n- from b\n< topic").unwrap();
        assert!(matches!(bot.sort_replies(), Err(LoadError::InheritanceCycle { .. })));

        bot.set_uservar("u", "topic", Some("a"));
        assert_eq!(bot.reply("u", "y"), "from b");
    }

    #[test]
    fn dump_lists_topics_by_name() {
        let bot = bot("> topic zoo inherits random\n+ animal\n- yes\n< topic\n+ hello\n- hi\n+ *\n- what");
        let dump = bot.sorted_triggers();
        let names: Vec<&str> = dump.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["random", "zoo"]);
        assert_eq!(dump[1].triggers, vec!["animal", "hello", "*"]);
    }

    #[test]
    fn directory_loading_filters_by_extension() {
        let dir = std::env::temp_dir().join(format!("colloquy-load-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.rive"), "+ bye\n- Goodbye!").unwrap();
        fs::write(dir.join("a.RIVE"), "+ hello\n- Hi!").unwrap();
        fs::write(dir.join("notes.txt"), "+ ignored\n- nope").unwrap();

        let bot = Interpreter::default();
        let reports = bot.load_directory(&dir).unwrap();
        bot.sort_replies().unwrap();
        fs::remove_dir_all(&dir).unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports[0].source.ends_with("a.RIVE"));
        assert_eq!(bot.reply("u", "hello"), "Hi!");
        assert_eq!(bot.reply("u", "ignored"), crate::ERR_NO_MATCH);
        assert!(matches!(bot.load_directory(dir.join("missing")), Err(LoadError::Io { .. })));
    }
}
