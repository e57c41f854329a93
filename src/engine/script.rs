//! Script parser.
//!
//! Scripts are line oriented. After trimming, the first character of a line
//! selects the directive:
//!
//! ```text
//! !  define        ! var name = Aiden
//! >  open label    > topic games inherits random
//! <  close label   < topic
//! +  trigger       + my name is *
//! %  previous      % what is your name
//! -  reply         - Nice to meet you, <star>.
//! ^  continuation  ^ (appended to the line above)
//! @  redirect      @ hello
//! *  condition     * <get name> == undefined => Who are you?
//! &  action        & knowledge search
//! =  learn         = <set subject=<star>>...
//! ```
//!
//! Parsing mutates a staging [`Brain`] in place. Problems are logged and
//! collected in [`ParseReport::warnings`]; the offending line is skipped. The
//! only error that stops a document is a `! version` newer than the engine
//! supports.
//!
//! ## Look-ahead
//!
//! Before a line is dispatched the parser peeks at the lines that follow:
//!
//! - `+` followed by `%`: the `%` text pairs with this trigger, which is
//!   stored under the key `pattern{previous}previous`.
//! - `!` followed by `^` lines: their text is joined with a `<crlf>` marker
//!   (arrays split on it, other definitions drop it).
//! - any other directive followed by `^` lines: their text is appended as is.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::brain::Brain;
use super::topics::{Action, ActionKind, PREVIOUS_MARKER, Trigger};
use crate::error::ParseError;
use crate::external::{Language, ObjectHandler};
use crate::{BEGIN_TOPIC, DEFAULT_TOPIC, SUPPORTED_VERSION};

/// Outcome of parsing one document.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    /// File path, or `(streamed)` for in-memory code.
    pub source: String,
    /// Number of physical lines read.
    pub lines: usize,
    /// Non-fatal problems, in line order.
    pub warnings: Vec<ParseError>,
}

/// Language assumed for `> object NAME` lines that do not name one.
const DEFAULT_OBJECT_LANGUAGE: &str = "javascript";

struct ObjectBlock {
    name: String,
    language: String,
    handler: Option<Arc<dyn ObjectHandler>>,
    line: usize,
    code: Vec<String>,
}

struct ScriptParser<'a> {
    brain: &'a mut Brain,
    handlers: &'a HashMap<String, Arc<dyn ObjectHandler>>,
    report: ParseReport,
    topic: String,
    on_trigger: Option<String>,
    in_comment: bool,
    object: Option<ObjectBlock>,
}

/// Parse `code` into `brain`.
pub(crate) fn parse_script(
    brain: &mut Brain,
    handlers: &HashMap<String, Arc<dyn ObjectHandler>>,
    source: &str,
    code: &str,
) -> Result<ParseReport, ParseError> {
    let lines: Vec<&str> = code.lines().collect();
    debug!(source, lines = lines.len(), "parsing script");

    let mut parser = ScriptParser {
        brain,
        handlers,
        report: ParseReport { source: source.to_string(), lines: lines.len(), warnings: Vec::new() },
        topic: DEFAULT_TOPIC.to_string(),
        on_trigger: None,
        in_comment: false,
        object: None,
    };

    for index in 0..lines.len() {
        parser.line(&lines, index)?;
    }

    if let Some(object) = parser.object.take() {
        let line = object.line;
        parser.warn(ParseError::UnterminatedObject { source_label: source.to_string(), line, name: object.name });
    }

    Ok(parser.report)
}

impl ScriptParser<'_> {
    fn warn(&mut self, err: ParseError) {
        warn!(%err, "script problem");
        self.report.warnings.push(err);
    }

    fn label(&self) -> String {
        self.report.source.clone()
    }

    fn line(&mut self, lines: &[&str], index: usize) -> Result<(), ParseError> {
        let lineno = index + 1;
        let line = lines[index].trim();

        if let Some(object) = self.object.as_mut() {
            if line.starts_with("<object") || line.starts_with("< object") {
                self.close_object();
            } else {
                object.code.push(line.to_string());
            }
            return Ok(());
        }

        if line.starts_with("/*") {
            if line.contains("*/") {
                return Ok(());
            }
            self.in_comment = true;
        } else if line.starts_with('/') {
            return Ok(());
        } else if line.contains("*/") {
            self.in_comment = false;
            return Ok(());
        }
        if self.in_comment || line.chars().count() < 2 {
            return Ok(());
        }

        let Some(cmd) = line.chars().next() else { return Ok(()) };
        let mut text = line[cmd.len_utf8()..].trim().to_string();
        if let Some((before, _)) = text.split_once(" // ") {
            text = before.to_string();
        }

        let previous = self.look_ahead(cmd, &mut text, &lines[index + 1..]);

        match cmd {
            '!' => self.define(&text, lineno)?,
            '>' => self.open_label(&text, lineno),
            '<' => self.close_label(&text, lineno),
            '+' => self.trigger(&text, previous),
            '-' => {
                if let Some(trigger) = self.current_trigger("reply", lineno) {
                    trigger.replies.push(text);
                }
            }
            '&' => {
                if let Some(trigger) = self.current_trigger("action", lineno) {
                    trigger.actions.push(Action { kind: ActionKind::KnowledgeSearch, content: text });
                }
            }
            '=' => {
                if let Some(trigger) = self.current_trigger("learn", lineno) {
                    trigger.persistent = false;
                    trigger.replies.push(text);
                }
            }
            '@' => {
                if let Some(trigger) = self.current_trigger("redirect", lineno) {
                    trigger.redirects.push(text);
                }
            }
            '*' => {
                if let Some(trigger) = self.current_trigger("condition", lineno) {
                    trigger.conditions.push(text);
                }
            }
            '%' | '^' => {}
            other => {
                self.warn(ParseError::UnknownCommand { source_label: self.label(), line: lineno, command: other })
            }
        }
        Ok(())
    }

    /// Fold following `^` lines into `text`; for a trigger, return its `%Previous`.
    fn look_ahead(&self, cmd: char, text: &mut String, following: &[&str]) -> Option<String> {
        if matches!(cmd, '^' | '%') {
            return None;
        }

        for peek in following {
            let peek = peek.trim();
            let Some(peek_cmd) = peek.chars().next() else { continue };
            let body = peek[peek_cmd.len_utf8()..].trim();
            if body.is_empty() {
                continue;
            }

            match (cmd, peek_cmd) {
                ('+', '%') => return Some(body.to_string()),
                ('!', '^') => {
                    text.push_str("<crlf>");
                    text.push_str(body);
                }
                (_, '^') => text.push_str(body),
                _ => break,
            }
        }
        None
    }

    fn define(&mut self, text: &str, lineno: usize) -> Result<(), ParseError> {
        let (left, value) = match text.split_once('=') {
            Some((left, value)) => (left.trim(), value.trim()),
            None => (text.trim(), ""),
        };
        let mut left = left.splitn(2, char::is_whitespace);
        let kind = left.next().unwrap_or_default().to_string();
        let name = left.next().map(|n| n.trim().to_lowercase()).unwrap_or_default();

        let value = if kind == "array" { value.to_string() } else { value.replace("<crlf>", "") };

        match kind.as_str() {
            "version" => {
                let Ok(version) = value.parse::<f64>() else {
                    self.warn(ParseError::InvalidVersion { source_label: self.label(), line: lineno, value });
                    return Ok(());
                };
                if version > SUPPORTED_VERSION {
                    let err = ParseError::UnsupportedVersion {
                        source_label: self.label(),
                        line: lineno,
                        version,
                        supported: SUPPORTED_VERSION,
                    };
                    tracing::error!(%err, "aborting document");
                    return Err(err);
                }
                debug!(version, "script version");
                return Ok(());
            }
            "language" => {
                info!(language = %value, "bot language");
                self.brain.language = Language::new(&value);
                return Ok(());
            }
            _ => {}
        }

        if name.is_empty() {
            self.warn(ParseError::MissingName { source_label: self.label(), line: lineno, kind });
            return Ok(());
        }
        if value.is_empty() {
            self.warn(ParseError::MissingValue { source_label: self.label(), line: lineno, kind });
            return Ok(());
        }
        let value = (value != "<undef>").then_some(value.as_str());

        match kind.as_str() {
            "global" => {
                if !self.brain.set_global(&name, value) {
                    warn!(name, ?value, "global rejected");
                }
            }
            "var" => self.brain.set_variable(&name, value),
            "array" => match value {
                Some(raw) => self.brain.defs.set_array(&name, raw),
                None => {
                    self.brain.defs.arrays.remove(&name);
                }
            },
            "sub" => self.brain.set_substitution(&name, value),
            "person" => self.brain.set_person_substitution(&name, value),
            _ => self.warn(ParseError::UnknownDefinition { source_label: self.label(), line: lineno, kind }),
        }
        Ok(())
    }

    fn open_label(&mut self, text: &str, lineno: usize) {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut kind = words.first().map(|w| w.to_lowercase()).unwrap_or_default();
        let mut name = words.get(1).map(|w| w.to_string()).unwrap_or_default();

        if kind == "begin" {
            kind = "topic".to_string();
            name = BEGIN_TOPIC.to_string();
        }

        match kind.as_str() {
            "topic" => {
                if name.is_empty() {
                    self.warn(ParseError::MissingName { source_label: self.label(), line: lineno, kind });
                    return;
                }
                debug!(topic = %name, "open topic");
                self.on_trigger = None;
                self.topic = name;

                let topic = self.brain.graph.topic_mut(&self.topic);
                let mut relation = None;
                for word in words.iter().skip(2) {
                    match word.to_lowercase().as_str() {
                        "includes" => relation = Some(true),
                        "inherits" => relation = Some(false),
                        _ => match relation {
                            Some(true) => topic.includes.push(word.to_string()),
                            Some(false) => topic.inherits.push(word.to_string()),
                            None => {}
                        },
                    }
                }
            }
            "object" => {
                self.on_trigger = None;
                let language = match words.get(2) {
                    Some(lang) => lang.to_lowercase(),
                    None => {
                        warn!(object = %name, "object without a language, assuming {DEFAULT_OBJECT_LANGUAGE}");
                        DEFAULT_OBJECT_LANGUAGE.to_string()
                    }
                };
                let handler = self.handlers.get(&language).cloned();
                if handler.is_none() {
                    info!(object = %name, %language, "no handler for object language, skipping block");
                }
                self.object = Some(ObjectBlock { name, language, handler, line: lineno, code: Vec::new() });
            }
            _ => self.warn(ParseError::UnknownLabel { source_label: self.label(), line: lineno, label: kind }),
        }
    }

    fn close_label(&mut self, text: &str, lineno: usize) {
        let kind = text.trim().to_lowercase();
        match kind.as_str() {
            "begin" | "topic" => {
                debug!(topic = %self.topic, "close topic");
                self.topic = DEFAULT_TOPIC.to_string();
                self.on_trigger = None;
            }
            "object" => {}
            _ => self.warn(ParseError::UnknownEndLabel { source_label: self.label(), line: lineno, label: kind }),
        }
    }

    fn close_object(&mut self) {
        let Some(object) = self.object.take() else { return };
        let Some(handler) = object.handler else { return };

        if handler.load(&object.name, &object.code) {
            debug!(object = %object.name, language = %object.language, "object loaded");
        } else {
            warn!(object = %object.name, language = %object.language, "object handler refused code");
        }
        self.brain.objects.insert(object.name, object.language);
    }

    fn trigger(&mut self, pattern: &str, previous: Option<String>) {
        let topic = self.brain.graph.topic_mut(&self.topic);
        let key = match previous {
            Some(previous) => {
                topic.trigger_mut(pattern).has_previous = true;
                format!("{pattern}{PREVIOUS_MARKER}{previous}")
            }
            None => pattern.to_string(),
        };
        topic.trigger_mut(&key);
        self.on_trigger = Some(key);
    }

    fn current_trigger(&mut self, directive: &'static str, lineno: usize) -> Option<&mut Trigger> {
        let Some(key) = self.on_trigger.clone() else {
            self.warn(ParseError::OutsideTrigger { source_label: self.label(), line: lineno, directive });
            return None;
        };
        Some(self.brain.graph.topic_mut(&self.topic).trigger_mut(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> (Brain, Result<ParseReport, ParseError>) {
        let mut brain = Brain::new(50);
        let report = parse_script(&mut brain, &HashMap::new(), "(test)", code);
        (brain, report)
    }

    #[test]
    fn triggers_collect_their_directives() {
        let (brain, report) = parse(
            "
            + hello bot
            - Hello, human!
            - Hi there!
            @ hi
            * <get name> != undefined => Hello, <get name>!
            & search
            ",
        );
        assert!(report.unwrap().warnings.is_empty());
        let trigger = brain.graph.get("random").unwrap().trigger("hello bot").unwrap();
        assert_eq!(trigger.replies, vec!["Hello, human!", "Hi there!"]);
        assert_eq!(trigger.redirects, vec!["hi"]);
        assert_eq!(trigger.conditions, vec!["<get name> != undefined => Hello, <get name>!"]);
        assert!(trigger.has_knowledge_search());
        assert!(trigger.persistent);
    }

    #[test]
    fn continuation_lines_are_appended() {
        let (brain, _) = parse("+ tell me a story\n- Once upon a time\n^ there was a bot.\n! array colors = red blue\n^ light green|dark green");
        let trigger = brain.graph.get("random").unwrap().trigger("tell me a story").unwrap();
        assert_eq!(trigger.replies, vec!["Once upon a timethere was a bot."]);
        assert_eq!(brain.defs.array("colors").map(<[String]>::len), Some(4));
    }

    #[test]
    fn previous_pairs_with_the_trigger_above() {
        let (brain, _) = parse("+ yes\n% are you well\n- Glad to hear it.");
        let topic = brain.graph.get("random").unwrap();
        assert_eq!(topic.trigger("yes{previous}are you well").unwrap().replies, vec!["Glad to hear it."]);
        let twin = topic.trigger("yes").unwrap();
        assert!(twin.has_previous && twin.is_empty());
    }

    #[test]
    fn definitions_fill_the_tables() {
        let (brain, report) = parse(
            "! version = 2.0\n! var name = Aiden\n! global depth = 10\n! sub what's = what is\n! person i = you\n! language = spanish\n! var gone = <undef>",
        );
        assert!(report.unwrap().warnings.is_empty());
        assert_eq!(brain.defs.var("name"), Some("Aiden"));
        assert_eq!(brain.depth, 10);
        assert_eq!(brain.defs.subs.get("what's"), Some("what is"));
        assert_eq!(brain.defs.person.get("i"), Some("you"));
        assert_eq!(brain.language, Language::new("spanish"));
        assert_eq!(brain.defs.var("gone"), None);
    }

    #[test]
    fn newer_versions_abort_the_document() {
        let (brain, report) = parse("! version = 3.5\n+ hi\n- hello");
        assert!(matches!(report, Err(ParseError::UnsupportedVersion { line: 1, .. })));
        assert!(brain.graph.get("random").is_none());
    }

    #[test]
    fn problems_are_warnings() {
        let (_, report) = parse("- orphan reply\n! bogus x = y\n! var = nothing\n> nonsense\n< nonsense\n? what");
        let warnings = report.unwrap().warnings;
        assert_eq!(warnings.len(), 6);
        assert!(matches!(warnings[0], ParseError::OutsideTrigger { directive: "reply", line: 1, .. }));
        assert!(matches!(warnings[1], ParseError::UnknownDefinition { .. }));
        assert!(matches!(warnings[2], ParseError::MissingName { .. }));
        assert!(matches!(warnings[3], ParseError::UnknownLabel { .. }));
        assert!(matches!(warnings[4], ParseError::UnknownEndLabel { .. }));
        assert!(matches!(warnings[5], ParseError::UnknownCommand { command: '?', .. }));
    }

    #[test]
    fn comments_are_skipped() {
        let (brain, _) = parse("// a comment\n/* block\n+ hidden\n- no\n*/\n+ shown // trailing\n- yes");
        let topic = brain.graph.get("random").unwrap();
        assert!(topic.trigger("hidden").is_none());
        assert_eq!(topic.trigger("shown").unwrap().replies, vec!["yes"]);
    }

    #[test]
    fn topics_record_includes_and_inherits() {
        let (brain, _) = parse(
            "> topic game includes extras more inherits random\n+ play\n- ok\n< topic\n> begin\n+ request\n- {ok}\n< begin",
        );
        let game = brain.graph.get("game").unwrap();
        assert_eq!(game.includes, vec!["extras", "more"]);
        assert_eq!(game.inherits, vec!["random"]);
        assert!(game.trigger("play").is_some());
        assert!(brain.graph.get(BEGIN_TOPIC).unwrap().trigger("request").is_some());
    }

    #[test]
    fn learn_lines_make_the_trigger_non_persistent() {
        let (brain, _) = parse("+ * is *\n= <set subject=<star1>><set definition=<star2>>I see.");
        let trigger = brain.graph.get("random").unwrap().trigger("* is *").unwrap();
        assert!(!trigger.persistent);
        assert_eq!(trigger.replies.len(), 1);
    }

    struct Recorder(parking_lot::Mutex<Vec<(String, Vec<String>)>>);

    impl ObjectHandler for Recorder {
        fn load(&self, name: &str, code: &[String]) -> bool {
            self.0.lock().push((name.to_string(), code.to_vec()));
            true
        }

        fn call(&self, _name: &str, _user: &str, _args: &[String]) -> String {
            String::new()
        }
    }

    #[test]
    fn object_blocks_go_to_their_handler() {
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        let mut handlers: HashMap<String, Arc<dyn ObjectHandler>> = HashMap::new();
        handlers.insert("rhai".into(), recorder.clone());

        let mut brain = Brain::new(50);
        let code = "> object reverse rhai\nlet x = 1;\nx\n< object\n> object skipped perl\n+ not a trigger\n< object";
        let report = parse_script(&mut brain, &handlers, "(test)", code).unwrap();

        assert!(report.warnings.is_empty());
        assert_eq!(brain.objects.get("reverse").map(String::as_str), Some("rhai"));
        assert!(!brain.objects.contains_key("skipped"));
        assert_eq!(recorder.0.lock().as_slice(), &[("reverse".to_string(), vec!["let x = 1;".to_string(), "x".to_string()])]);
        assert!(brain.graph.get("random").is_none());
    }
}
