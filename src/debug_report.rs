use colloquy::{ParseReport, ReplyDetails, ReplyStep, TopicDump};

/// What a span of report text is, which decides its colour.
#[derive(Clone, Copy)]
enum Tone {
    Rule,
    Faint,
    Topic,
    Matched,
    Missed,
    Label,
    Begin,
    Previous,
    Warning,
}

impl Tone {
    fn sgr(self) -> &'static str {
        match self {
            Tone::Rule => "90",
            Tone::Faint => "2",
            Tone::Topic => "1;36",
            Tone::Matched => "32",
            Tone::Missed => "31",
            Tone::Label => "34",
            Tone::Begin => "35",
            Tone::Previous | Tone::Warning => "33",
        }
    }
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn tone(&self, tone: Tone, text: impl AsRef<str>) -> String {
        let text = text.as_ref();
        if self.enabled { format!("\x1b[{}m{text}\x1b[0m", tone.sgr()) } else { text.to_string() }
    }
}

pub fn print_load(reports: &[ParseReport], color: bool) {
    let palette = Palette::new(color);
    let lines: usize = reports.iter().map(|r| r.lines).sum();
    eprintln!(
        "{} {} script(s) {}",
        palette.tone(Tone::Matched, "loaded"),
        reports.len(),
        palette.tone(Tone::Faint, format!("({lines} lines)"))
    );
    for warning in reports.iter().flat_map(|r| &r.warnings) {
        eprintln!("  {} {warning}", palette.tone(Tone::Warning, "warning:"));
    }
}

pub fn print_topics(topics: &[TopicDump], color: bool) {
    let palette = Palette::new(color);
    println!("\n{}", palette.tone(Tone::Rule, "━━━ Sorted triggers ━━━"));

    for topic in topics {
        let mut header = palette.tone(Tone::Topic, &topic.name);
        for (relation, names) in [("includes", &topic.includes), ("inherits", &topic.inherits)] {
            if !names.is_empty() {
                header.push_str(&format!(" {} {}", palette.tone(Tone::Faint, relation), names.join(", ")));
            }
        }
        println!("  {header}");

        if topic.triggers.is_empty() {
            println!("    {}", palette.tone(Tone::Faint, "(no triggers)"));
        }
        for (idx, trigger) in topic.triggers.iter().enumerate() {
            println!("    {} {trigger}", palette.tone(Tone::Rule, format!("[{idx}]")));
        }
    }
    println!();
}

pub fn print_turn(details: &ReplyDetails, color: bool) {
    let palette = Palette::new(color);
    println!("{}", palette.tone(Tone::Rule, "━━━ Trace ━━━"));

    for step in &details.steps {
        println!("  {}", fmt_step(step, &palette));
    }

    let ended = details.topic.as_deref().unwrap_or("-");
    println!(
        "  {} {} -> {}  │  {} {}  │  {} {:?}",
        palette.tone(Tone::Faint, "topic:"),
        palette.tone(Tone::Topic, &details.starting_topic),
        palette.tone(Tone::Topic, ended),
        palette.tone(Tone::Faint, "depth:"),
        details.depth,
        palette.tone(Tone::Faint, "time:"),
        details.elapsed,
    );
}

fn fmt_step(step: &ReplyStep, palette: &Palette) -> String {
    let label = if step.begin {
        palette.tone(Tone::Begin, format!("{:>7}", "begin"))
    } else if step.via_previous {
        palette.tone(Tone::Previous, format!("{:>7}", format!("prev {}", step.step)))
    } else {
        palette.tone(Tone::Label, format!("{:>7}", format!("step {}", step.step)))
    };
    let matched = match (&step.matched, &step.owner) {
        (Some(pattern), Some(owner)) if owner != &step.topic => {
            format!("{} {}", palette.tone(Tone::Matched, pattern), palette.tone(Tone::Faint, format!("(from {owner})")))
        }
        (Some(pattern), _) => palette.tone(Tone::Matched, pattern),
        (None, _) => palette.tone(Tone::Missed, "no match"),
    };

    format!(
        "{label} {} {} {matched}",
        palette.tone(Tone::Faint, format!("[{}] \"{}\"", step.topic, step.message)),
        palette.tone(Tone::Faint, "→"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_palette_leaves_text_alone() {
        assert_eq!(Palette::new(false).tone(Tone::Missed, "no match"), "no match");
    }

    #[test]
    fn tones_wrap_text_in_their_escape() {
        let palette = Palette::new(true);
        assert_eq!(palette.tone(Tone::Topic, "random"), "\x1b[1;36mrandom\x1b[0m");
        assert_eq!(palette.tone(Tone::Missed, "x"), "\x1b[31mx\x1b[0m");
    }
}
