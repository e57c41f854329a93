/// Compile a literal regex once and hand out a `&'static Regex`.
///
/// Used for the fixed tag/directive shapes the engine scans for; trigger
/// patterns are compiled at sort time instead (see `engine/pattern.rs`).
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}
