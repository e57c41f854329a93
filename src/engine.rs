//! Dialogue engine.
//!
//! Script text goes in at the top, replies come out at the bottom:
//!
//! ```text
//! script text ──> parse_script (script.rs)
//!                   - `!` definitions  ──> Definitions (tables.rs)
//!                   - `>`/`<` labels   ──> TopicGraph (topics.rs)
//!                   - `+ - * @ & =`    ──> Trigger
//!                              │
//!                              v
//!                 Brain::sort (brain.rs)
//!                   - flatten includes/inherits (topics.rs)
//!                   - rank by specificity (sorter.rs)
//!                   - compile patterns (pattern.rs)
//!                              │
//!                              v
//!                 published Arc<Brain>
//!                              │
//! message ──> Resolver (resolve.rs) ──> process_tags (tags.rs) ──> reply
//!                 - BEGIN gate, %Previous, sorted scan
//!                 - conditions, weighted choice, redirects
//! ```
//!
//! ## Responsibilities by module
//!
//! - `tables.rs`: globals, bot variables, arrays and the two substitution tables.
//! - `topics.rs`: topics, triggers and the includes/inherits graph walks.
//! - `sorter.rs`: the specificity order the match loop relies on.
//! - `pattern.rs`: trigger pattern AST and its regex rendering.
//! - `script.rs`: the line parser.
//! - `brain.rs`: snapshots, publishing, collaborators and the regex cache.
//! - `resolve.rs`: the per-turn state machine.
//! - `tags.rs`: reply template expansion.
//! - `metrics.rs`: the per-turn trace behind `reply_verbose`.
//!
//! ## Debugging
//!
//! Run with `RUST_LOG=colloquy=debug` to see matches, choices and tag side
//! effects; `trace` adds the sorter's progress.

#[path = "engine/brain.rs"]
mod brain;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/pattern.rs"]
mod pattern;
#[path = "engine/resolve.rs"]
mod resolve;
#[path = "engine/script.rs"]
mod script;
#[path = "engine/sorter.rs"]
mod sorter;
#[path = "engine/tables.rs"]
mod tables;
#[path = "engine/tags.rs"]
mod tags;
#[path = "engine/topics.rs"]
mod topics;


pub(crate) use brain::Engine;
pub(crate) use metrics::ReplyTrace;
pub use metrics::ReplyStep;
pub(crate) use resolve::Resolver;
pub use script::ParseReport;
