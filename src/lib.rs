//! A rule-based dialogue engine.
//!
//! Scripts written in a small line-oriented language declare *triggers*
//! (message patterns) and their replies. The [`Interpreter`] loads scripts,
//! sorts every topic's triggers from most to least specific, and answers
//! messages by taking the first trigger that matches and expanding its reply
//! template.
//!
//! ```
//! use colloquy::{Interpreter, Options};
//!
//! let bot = Interpreter::new(Options { seed: Some(1), ..Options::default() });
//! bot.stream("+ hello bot\n- Hello, human!\n+ my name is *\n- Nice to meet you, <formal>.").unwrap();
//! bot.sort_replies().unwrap();
//!
//! assert_eq!(bot.reply("alice", "Hello bot"), "Hello, human!");
//! assert_eq!(bot.reply("alice", "my name is alice smith"), "Nice to meet you, Alice Smith.");
//! ```
//!
//! Conversation turns never fail. When nothing can be said the reply is one
//! of the `ERR_*` sentinels below; problems inside a reply template become
//! inline `[ERR: ...]` fragments.

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;
mod external;
mod session;

pub use api::{Interpreter, Options, ReplyDetails, ReplyResult, TopicDump};
pub use engine::{ParseReport, ReplyStep};
pub use error::{LoadError, ParseError, Result};
pub use external::{
    KeywordExtractor, KnowledgeProvider, Language, LongTermStore, MemoryRecord, MemoryStore, ObjectHandler, Translator,
    WordExtractor,
};
pub use session::{DEFAULT_HISTORY_SIZE, DEFAULT_TOPIC, Session};

// --- Sentinels and reserved names -------------------------------------------

/// Value of any variable, star or history slot that was never set.
pub const UNDEFINED: &str = "undefined";

/// Reply when no trigger matches the message.
pub const ERR_NO_MATCH: &str = "ERR: No Reply Matched";

/// Reply when the matched trigger has no usable reply.
pub const ERR_NO_REPLY: &str = "ERR: No Reply Found";

/// Reply when redirects nest deeper than the configured depth.
pub const ERR_DEEP_RECURSION: &str = "ERR: Deep Recursion Detected!";

/// Newest `! version` the parser accepts.
pub const SUPPORTED_VERSION: f64 = 2.0;

/// Topic that `> begin` blocks are stored under.
pub const BEGIN_TOPIC: &str = "__begin__";
