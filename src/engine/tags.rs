//! Reply tag processing.
//!
//! Tags are expanded in a fixed order, each pass over the whole text. The
//! order matters: stars are substituted before `<set>` runs, so
//! `<set name=<star>>` stores the captured text, and `<get>` runs after the
//! arithmetic tags so it reads updated values.
//!
//! | Pass | Tags                                                        |
//! |------|-------------------------------------------------------------|
//! | 1    | shortcuts: `<person>` `<@>` `<formal>` `<sentence>` ...     |
//! | 2    | `{weight=N}` removal, `<input>`/`<reply>` indexing, `<id>`  |
//! | 3    | escapes: `\s` `\n` `\\` `\#`                                |
//! | 4    | `<star>` `<starN>` `<botstar>` `<botstarN>`                 |
//! | 5    | `<inputN>` `<replyN>`                                       |
//! | 6    | `{random}` `<bot>` `<env>` `{!code}`                        |
//! | 7    | `{person}` `{formal}` `{sentence}` `{uppercase}` `{lowercase}` |
//! | 8    | `<set>` `<add>` `<sub>` `<mult>` `<div>` `<get>` `{topic=}` |
//! | 9    | `{@redirect}` `<call>`                                      |

use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use super::resolve::{MatchContext, Resolver};
use crate::UNDEFINED;

const SHORTCUTS: [(&str, &str); 6] = [
    ("<person>", "{person}<star>{/person}"),
    ("<@>", "{@<star>}"),
    ("<formal>", "{formal}<star>{/formal}"),
    ("<sentence>", "{sentence}<star>{/sentence}"),
    ("<uppercase>", "{uppercase}<star>{/uppercase}"),
    ("<lowercase>", "{lowercase}<star>{/lowercase}"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arithmetic {
    Add,
    Sub,
    Mult,
    Div,
}

impl Arithmetic {
    fn name(self) -> &'static str {
        match self {
            Arithmetic::Add => "add",
            Arithmetic::Sub => "sub",
            Arithmetic::Mult => "mult",
            Arithmetic::Div => "div",
        }
    }

    fn tag(self) -> &'static Regex {
        match self {
            Arithmetic::Add => regex!(r"<add (.+?)=(.+?)>"),
            Arithmetic::Sub => regex!(r"<sub (.+?)=(.+?)>"),
            Arithmetic::Mult => regex!(r"<mult (.+?)=(.+?)>"),
            Arithmetic::Div => regex!(r"<div (.+?)=(.+?)>"),
        }
    }

    fn apply(self, current: i64, operand: i64) -> Option<i64> {
        match self {
            Arithmetic::Add => current.checked_add(operand),
            Arithmetic::Sub => current.checked_sub(operand),
            Arithmetic::Mult => current.checked_mul(operand),
            Arithmetic::Div => current.checked_div(operand),
        }
    }
}

impl Resolver<'_> {
    /// Expand every tag in `reply`.
    pub(super) fn process_tags(&mut self, reply: &str, ctx: &MatchContext, step: usize) -> String {
        let mut text = reply.to_string();
        for (short, long) in SHORTCUTS {
            text = text.replace(short, long);
        }

        text = regex!(r"\{weight=\d+\}").replace_all(&text, "").into_owned();
        text = text.replace("<input>", "<input1>").replace("<reply>", "<reply1>");
        text = text.replace("<id>", self.user);
        text = unescape(&text);

        text = text.replace("<star>", &star(&ctx.stars, 1)).replace("<botstar>", &star(&ctx.botstars, 1));
        text = regex!(r"<(star|botstar)(\d+)>")
            .replace_all(&text, |caps: &Captures<'_>| {
                let n = caps[2].parse::<usize>().unwrap_or(0);
                let list = if &caps[1] == "star" { &ctx.stars } else { &ctx.botstars };
                star(list, n)
            })
            .into_owned();

        text = regex!(r"<(input|reply)([0-9])>")
            .replace_all(&text, |caps: &Captures<'_>| {
                let n = caps[2].parse::<usize>().unwrap_or(0);
                let past = if &caps[1] == "input" { self.session.input(n) } else { self.session.reply(n) };
                past.to_lowercase()
            })
            .into_owned();

        text = regex!(r"\{random\}(.+?)\{/random\}")
            .replace_all(&text, |caps: &Captures<'_>| {
                let options: Vec<&str> = caps[1].split('|').collect();
                options[self.engine.pick(options.len())].to_string()
            })
            .into_owned();

        text = regex!(r"<bot (.+?)>")
            .replace_all(&text, |caps: &Captures<'_>| self.brain.defs.var(&caps[1]).unwrap_or(UNDEFINED).to_string())
            .into_owned();
        text = regex!(r"<env (.+?)>")
            .replace_all(&text, |caps: &Captures<'_>| self.brain.defs.global(&caps[1]).unwrap_or(UNDEFINED).to_string())
            .into_owned();

        if text.contains("{!") {
            text = regex!(r"(?s)\{!(.+?)\}")
                .replace_all(&text, |caps: &Captures<'_>| {
                    self.stream(&caps[1]);
                    ""
                })
                .into_owned();
        }

        text = regex!(r"\{person\}(.+?)\{/person\}")
            .replace_all(&text, |caps: &Captures<'_>| self.brain.defs.person.apply(&caps[1]))
            .into_owned();
        text = regex!(r"\{formal\}(.+?)\{/formal\}").replace_all(&text, |caps: &Captures<'_>| formal(&caps[1])).into_owned();
        text = regex!(r"\{sentence\}(.+?)\{/sentence\}")
            .replace_all(&text, |caps: &Captures<'_>| sentence(&caps[1]))
            .into_owned();
        text = regex!(r"\{uppercase\}(.+?)\{/uppercase\}")
            .replace_all(&text, |caps: &Captures<'_>| caps[1].to_uppercase())
            .into_owned();
        text = regex!(r"\{lowercase\}(.+?)\{/lowercase\}")
            .replace_all(&text, |caps: &Captures<'_>| caps[1].to_lowercase())
            .into_owned();

        text = self.set_tags(&text);
        for op in [Arithmetic::Add, Arithmetic::Sub, Arithmetic::Mult, Arithmetic::Div] {
            text = op.tag().replace_all(&text, |caps: &Captures<'_>| self.arithmetic(op, &caps[1], &caps[2])).into_owned();
        }
        text = regex!(r"<get (.+?)>").replace_all(&text, |caps: &Captures<'_>| self.session.get(&caps[1]).to_string()).into_owned();
        text = self.topic_tags(&text);

        text = regex!(r"\{@(.+?)\}")
            .replace_all(&text, |caps: &Captures<'_>| {
                let target = self.brain.format_message(caps[1].trim());
                self.trace.redirects += 1;
                debug!(%target, "inline redirect");
                self.resolve(&target, false, step + 1)
            })
            .into_owned();

        regex!(r"<call>(.+?)</call>").replace_all(&text, |caps: &Captures<'_>| self.call(&caps[1])).into_owned()
    }

    /// The BEGIN reply honors only `<set>` and `{topic=}`.
    pub(super) fn begin_tags(&mut self, reply: &str) -> String {
        let text = self.set_tags(reply);
        self.topic_tags(&text)
    }

    fn set_tags(&mut self, text: &str) -> String {
        regex!(r"<set (.+?)=(.+?)>")
            .replace_all(text, |caps: &Captures<'_>| {
                debug!(user = self.user, var = &caps[1], value = &caps[2], "set user var");
                self.session.set(&caps[1], &caps[2]);
                ""
            })
            .into_owned()
    }

    fn topic_tags(&mut self, text: &str) -> String {
        regex!(r"\{topic=(.+?)\}")
            .replace_all(text, |caps: &Captures<'_>| {
                info!(user = self.user, topic = &caps[1], "topic change");
                self.session.set_topic(&caps[1]);
                ""
            })
            .into_owned()
    }

    /// Run one arithmetic tag against a session variable. Returns the inline
    /// error on failure, empty text on success.
    fn arithmetic(&mut self, op: Arithmetic, var: &str, value: &str) -> String {
        let current = match self.session.get(var) {
            UNDEFINED => 0,
            raw => match raw.parse::<i64>() {
                Ok(n) => n,
                Err(_) => return format!("[ERR: Can't \"{}\" non-numeric variable {var}]", op.name()),
            },
        };
        let Ok(operand) = value.parse::<i64>() else {
            return format!("[ERR: Can't \"{}\" non-numeric value {value}]", op.name());
        };
        if op == Arithmetic::Div && operand == 0 {
            return "[ERR: Can't divide by zero!]".to_string();
        }

        match op.apply(current, operand) {
            Some(result) => {
                self.session.set(var, result.to_string());
                String::new()
            }
            None => format!("[ERR: Can't \"{}\" {var} out of range]", op.name()),
        }
    }

    fn stream(&mut self, code: &str) {
        let code = code.trim();
        let code = match code.chars().next() {
            Some('!' | '>' | '<' | '+' | '-' | '%' | '^' | '@' | '*' | '&' | '=') => code.to_string(),
            _ => format!("! {code}"),
        };
        info!(%code, "streaming code from reply");
        self.engine.stream_live(&code);
        self.refresh();
    }

    fn call(&mut self, data: &str) -> String {
        let mut parts = data.split(' ');
        let name = parts.next().unwrap_or_default();
        let args: Vec<String> = parts.map(str::to_string).collect();

        let handler = self
            .brain
            .objects
            .get(name)
            .and_then(|lang| self.engine.collaborators.handlers.get(lang));
        match handler {
            Some(handler) => {
                debug!(object = name, args = args.len(), "call");
                handler.call(name, self.user, &args)
            }
            None => {
                warn!(object = name, "object not found");
                "[ERR: Object Not Found]".to_string()
            }
        }
    }
}

/// Star `n` (1-based). The first star of an empty list reads `undefined`.
fn star(list: &[String], n: usize) -> String {
    match n.checked_sub(1).and_then(|i| list.get(i)) {
        Some(s) => s.clone(),
        None if n == 1 && list.is_empty() => UNDEFINED.to_string(),
        None => String::new(),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some('#') => out.push('#'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn formal(text: &str) -> String {
    text.split(' ').map(capitalize).collect::<Vec<_>>().join(" ")
}

fn sentence(text: &str) -> String {
    capitalize(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes() {
        assert_eq!(unescape(r"a\sb\nc\\d\#e\q"), "a b\nc\\d#e\\q");
    }

    #[test]
    fn case_transforms() {
        assert_eq!(formal("hello big world"), "Hello Big World");
        assert_eq!(sentence("hello big world"), "Hello big world");
        assert_eq!(sentence(""), "");
    }

    #[test]
    fn star_defaults() {
        assert_eq!(star(&[], 1), UNDEFINED);
        assert_eq!(star(&[], 2), "");
        assert_eq!(star(&["a".into(), "b".into()], 2), "b");
        assert_eq!(star(&["a".into()], 0), "");
    }
}
