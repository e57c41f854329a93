//! Trigger pattern compiler and matcher.
//!
//! A raw trigger is parsed once into a small AST of [`Segment`]s and rendered
//! into an anchored [`Regex`]. Wildcards become capture groups; the captured
//! texts, left to right, are the match's *stars*.
//!
//! | Pattern         | Regex                              | Captures |
//! |-----------------|------------------------------------|----------|
//! | `*` (alone)     | `(.*?)`                            | yes      |
//! | `*`             | `(.+?)`                            | yes      |
//! | `#`             | `(\d+?)`                           | yes      |
//! | `_`             | `([a-z ]+?)`                       | yes      |
//! | `[a\|b]`        | `(?:\s*a\s*\|\s*b\s*\|\s*)`        | no       |
//! | `(a\|b)`        | `(a\|b)`                           | yes      |
//! | `@name`         | `(?:v1\|v2\|...)`                  | no       |
//! | `<bot v>`       | bot variable, lowercased           | -        |
//! | `<get v>`       | session variable, lowercased       | -        |
//! | `<input N>`     | session history, lowercased        | -        |
//!
//! Everything else is literal text. Optionals swallow the whitespace around
//! them and never capture, even when they contain wildcards.
//!
//! Patterns that only depend on the brain (no `<get>`, `<input>`, `<reply>`)
//! are compiled once per snapshot; the rest are rendered per match.

use regex::Regex;

use super::tables::Definitions;
use crate::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Star { zero_width: bool },
    Number,
    Alpha,
    Optional(Vec<Vec<Segment>>),
    Group(Vec<Vec<Segment>>),
    Array(String),
    BotVar(String),
    UserVar(String),
    Input(usize),
    Reply(usize),
}

impl Segment {
    fn is_session_bound(&self) -> bool {
        match self {
            Segment::UserVar(_) | Segment::Input(_) | Segment::Reply(_) => true,
            Segment::Optional(alts) | Segment::Group(alts) => alts.iter().flatten().any(Segment::is_session_bound),
            _ => false,
        }
    }
}

/// Parse a raw trigger pattern. `{weight=N}` tags are dropped.
pub(crate) fn parse(pattern: &str) -> Vec<Segment> {
    let zero_width = pattern.trim() == "*";
    let cleaned = regex!(r"\{weight=\d+\}").replace_all(pattern, "");
    let mut lexer = Lexer { chars: cleaned.chars().collect(), pos: 0 };
    let mut segments = lexer.sequence(&[]);
    if zero_width {
        segments = vec![Segment::Star { zero_width: true }];
    }
    segments
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    /// Read segments until one of `stop` (left unconsumed) or the end.
    fn sequence(&mut self, stop: &[char]) -> Vec<Segment> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            if stop.contains(&c) {
                break;
            }
            self.pos += 1;
            match c {
                '*' => out.push(Segment::Star { zero_width: false }),
                '#' => out.push(Segment::Number),
                '_' => out.push(Segment::Alpha),
                '[' => {
                    trim_trailing_space(&mut out);
                    out.push(Segment::Optional(self.alternatives(']')));
                    while self.peek().is_some_and(char::is_whitespace) {
                        self.pos += 1;
                    }
                }
                '(' => out.push(Segment::Group(self.alternatives(')'))),
                '@' => match self.word() {
                    Some(name) => out.push(Segment::Array(name)),
                    None => push_literal(&mut out, '@'),
                },
                '<' => match self.tag() {
                    Some(segment) => out.push(segment),
                    None => push_literal(&mut out, '<'),
                },
                other => push_literal(&mut out, other),
            }
        }
        out
    }

    /// Pipe-separated alternatives up to `close`, which is consumed.
    fn alternatives(&mut self, close: char) -> Vec<Vec<Segment>> {
        let mut alts = Vec::new();
        loop {
            alts.push(self.sequence(&['|', close]));
            match self.peek() {
                Some('|') => self.pos += 1,
                Some(_) => {
                    self.pos += 1;
                    break;
                }
                None => break,
            }
        }
        alts
    }

    fn word(&mut self) -> Option<String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
    }

    /// Variable and history tags; the leading `<` is already consumed.
    fn tag(&mut self) -> Option<Segment> {
        let rest = self.rest();
        let caps = regex!(r"^(bot|get) ([^>]+)>|^(input|reply)([0-9]?)>").captures(&rest)?;
        let consumed = caps[0].chars().count();

        let segment = if let Some(kind) = caps.get(1) {
            let name = caps[2].trim().to_string();
            if kind.as_str() == "bot" { Segment::BotVar(name) } else { Segment::UserVar(name) }
        } else {
            let index = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(1);
            if &caps[3] == "input" { Segment::Input(index) } else { Segment::Reply(index) }
        };

        self.pos += consumed;
        Some(segment)
    }
}

fn push_literal(out: &mut Vec<Segment>, c: char) {
    if let Some(Segment::Literal(text)) = out.last_mut() {
        text.push(c);
    } else {
        out.push(Segment::Literal(c.to_string()));
    }
}

fn trim_trailing_space(out: &mut Vec<Segment>) {
    if let Some(Segment::Literal(text)) = out.last_mut() {
        let trimmed = text.trim_end().len();
        text.truncate(trimmed);
        if text.is_empty() {
            out.pop();
        }
    }
}

// --- Rendering -------------------------------------------------------------

/// Inputs a render may need besides the pattern itself.
#[derive(Clone, Copy)]
struct Scope<'a> {
    defs: &'a Definitions,
    session: Option<&'a Session>,
}

fn render(segments: &[Segment], scope: Scope<'_>, capture: bool, out: &mut String) {
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(&regex::escape(text)),
            Segment::Star { zero_width } => {
                let body = if *zero_width { ".*?" } else { ".+?" };
                wrap(out, body, capture);
            }
            Segment::Number => wrap(out, r"\d+?", capture),
            Segment::Alpha => wrap(out, "[a-z ]+?", capture),
            Segment::Optional(alts) => {
                out.push_str("(?:");
                for alt in alts {
                    out.push_str(r"\s*");
                    render(alt, scope, false, out);
                    out.push_str(r"\s*|");
                }
                out.push_str(r"\s*)");
            }
            Segment::Group(alts) => {
                out.push_str(if capture { "(" } else { "(?:" });
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    render(alt, scope, capture, out);
                }
                out.push(')');
            }
            Segment::Array(name) => {
                if let Some(values) = scope.defs.array(name) {
                    let joined =
                        values.iter().map(|v| regex::escape(&v.to_lowercase())).collect::<Vec<_>>().join("|");
                    out.push_str("(?:");
                    out.push_str(&joined);
                    out.push(')');
                }
            }
            Segment::BotVar(name) => {
                let value = scope.defs.var(name).unwrap_or(crate::UNDEFINED);
                out.push_str(&regex::escape(&value.to_lowercase()));
            }
            Segment::UserVar(name) => {
                let value = scope.session.map_or(crate::UNDEFINED, |s| s.get(name));
                out.push_str(&regex::escape(&value.to_lowercase()));
            }
            Segment::Input(n) => {
                let value = scope.session.map_or(crate::UNDEFINED, |s| s.input(*n));
                out.push_str(&regex::escape(&value.to_lowercase()));
            }
            Segment::Reply(n) => {
                let value = scope.session.map_or(crate::UNDEFINED, |s| s.reply(*n));
                out.push_str(&regex::escape(&value.to_lowercase()));
            }
        }
    }
}

fn wrap(out: &mut String, body: &str, capture: bool) {
    out.push_str(if capture { "(" } else { "(?:" });
    out.push_str(body);
    out.push(')');
}

/// A parsed trigger pattern, with its regex when it does not depend on a session.
#[derive(Debug, Clone)]
pub(crate) struct CompiledPattern {
    segments: Vec<Segment>,
    fixed: Option<Regex>,
}

impl CompiledPattern {
    pub fn new(pattern: &str, defs: &Definitions) -> Self {
        let segments = parse(pattern);
        let fixed = if segments.iter().any(Segment::is_session_bound) {
            None
        } else {
            let source = anchored(&segments, Scope { defs, session: None });
            match Regex::new(&source) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(pattern, %err, "trigger does not compile");
                    None
                }
            }
        };
        CompiledPattern { segments, fixed }
    }

    pub fn fixed(&self) -> Option<&Regex> {
        self.fixed.as_ref()
    }

    pub fn is_session_bound(&self) -> bool {
        self.segments.iter().any(Segment::is_session_bound)
    }

    /// Regex source for this pattern as seen by `session`.
    pub fn source(&self, defs: &Definitions, session: &Session) -> String {
        anchored(&self.segments, Scope { defs, session: Some(session) })
    }
}

fn anchored(segments: &[Segment], scope: Scope<'_>) -> String {
    let mut out = String::from("^");
    render(segments, scope, true, &mut out);
    out.push('$');
    out
}

/// Run `re` against `text` and collect its stars. Groups that did not take
/// part in the match yield an empty string.
pub(crate) fn stars(re: &Regex, text: &str) -> Option<Vec<String>> {
    let caps = re.captures(text)?;
    Some(caps.iter().skip(1).map(|m| m.map_or_else(String::new, |m| m.as_str().to_string())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_match(pattern: &str, text: &str) -> Option<Vec<String>> {
        let defs = Definitions::default();
        let compiled = CompiledPattern::new(pattern, &defs);
        stars(compiled.fixed().unwrap(), text)
    }

    #[test]
    fn parses_segments() {
        assert_eq!(
            parse("my name is *"),
            vec![Segment::Literal("my name is ".into()), Segment::Star { zero_width: false }]
        );
        assert_eq!(parse("*"), vec![Segment::Star { zero_width: true }]);
        assert_eq!(parse("hi{weight=20}"), vec![Segment::Literal("hi".into())]);
        assert_eq!(
            parse("i am <get age> [years old]"),
            vec![
                Segment::Literal("i am ".into()),
                Segment::UserVar("age".into()),
                Segment::Optional(vec![vec![Segment::Literal("years old".into())]]),
            ]
        );
        assert_eq!(parse("<input> and <reply2>"), vec![
            Segment::Input(1),
            Segment::Literal(" and ".into()),
            Segment::Reply(2)
        ]);
    }

    #[test]
    fn captures_stars_left_to_right() {
        assert_eq!(fixed_match("my name is *", "my name is bob"), Some(vec!["bob".to_string()]));
        assert_eq!(fixed_match("* told me to say *", "john told me to say hi"), Some(vec!["john".into(), "hi".into()]));
        assert_eq!(fixed_match("my name is *", "my name is "), None);
    }

    #[test]
    fn bare_star_matches_empty_input() {
        assert_eq!(fixed_match("*", ""), Some(vec![String::new()]));
        assert_eq!(fixed_match("*", "anything"), Some(vec!["anything".to_string()]));
    }

    #[test]
    fn number_and_alpha_wildcards() {
        assert_eq!(fixed_match("i am # years old", "i am 42 years old"), Some(vec!["42".to_string()]));
        assert_eq!(fixed_match("i am # years old", "i am old years old"), None);
        assert_eq!(fixed_match("call me _", "call me big bob"), Some(vec!["big bob".to_string()]));
        assert_eq!(fixed_match("call me _", "call me r2d2"), None);
    }

    #[test]
    fn optionals_absorb_whitespace_and_never_capture() {
        assert_eq!(fixed_match("what is [your] name", "what is your name"), Some(vec![]));
        assert_eq!(fixed_match("what is [your] name", "what is name"), Some(vec![]));
        assert_eq!(fixed_match("how [are|were] you *", "how were you today"), Some(vec!["today".to_string()]));
        assert_eq!(fixed_match("[*] hello", "well hello"), Some(vec![]));
    }

    #[test]
    fn groups_capture() {
        assert_eq!(fixed_match("i (like|love) *", "i love cats"), Some(vec!["love".into(), "cats".into()]));
    }

    #[test]
    fn literal_text_is_escaped() {
        assert_eq!(fixed_match("what is 2+2", "what is 2+2"), Some(vec![]));
        assert_eq!(fixed_match("what is 2+2", "what is 22"), None);
    }

    #[test]
    fn arrays_and_bot_vars_come_from_definitions() {
        let mut defs = Definitions::default();
        defs.set_array("colors", "Red|blue");
        defs.vars.insert("name".into(), "Aiden".into());

        let compiled = CompiledPattern::new("i like @colors", &defs);
        let re = compiled.fixed().unwrap();
        assert!(re.is_match("i like red"));
        assert!(!re.is_match("i like green"));

        let named = CompiledPattern::new("are you <bot name>", &defs);
        assert!(named.fixed().unwrap().is_match("are you aiden"));

        let missing = CompiledPattern::new("i like @shapes", &defs);
        assert!(missing.fixed().unwrap().is_match("i like "));
    }

    #[test]
    fn session_bound_patterns_render_per_session() {
        let defs = Definitions::default();
        let mut session = Session::new("alice", 9);
        session.set("name", "Alice");
        session.push_history("hello", "Hi There");

        let compiled = CompiledPattern::new("my name is <get name>", &defs);
        assert!(compiled.is_session_bound());
        assert!(compiled.fixed().is_none());
        let re = Regex::new(&compiled.source(&defs, &session)).unwrap();
        assert!(re.is_match("my name is alice"));

        let echo = CompiledPattern::new("<reply>", &defs);
        let re = Regex::new(&echo.source(&defs, &session)).unwrap();
        assert!(re.is_match("hi there"));
    }
}
