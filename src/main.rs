mod debug_report;

use colloquy::{Interpreter, LoadError, Options};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_USER: &str = "localuser";

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let options = Options { depth: config.depth, seed: config.seed, ..Options::default() };
    let bot = Interpreter::new(options);

    if let Err(err) = load(&bot, &config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    if config.dump {
        debug_report::print_topics(&bot.sorted_triggers(), config.color);
    }

    if let Err(err) = chat(&bot, &config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

enum Script {
    Dir(PathBuf),
    File(PathBuf),
}

impl Script {
    fn new(flag: &str, value: String) -> Self {
        if flag.starts_with("--dir") || flag == "-d" { Script::Dir(value.into()) } else { Script::File(value.into()) }
    }
}

struct CliConfig {
    scripts: Vec<Script>,
    user: String,
    depth: usize,
    seed: Option<u64>,
    dump: bool,
    trace: bool,
    color: bool,
}

fn load(bot: &Interpreter, config: &CliConfig) -> colloquy::Result<()> {
    let mut reports = Vec::new();
    for script in &config.scripts {
        match script {
            Script::Dir(path) => reports.extend(bot.load_directory(path)?),
            Script::File(path) => reports.push(bot.load_file(path)?),
        }
    }
    debug_report::print_load(&reports, config.color);

    match bot.sort_replies() {
        // Cycles are reported but the sorted snapshot is still usable.
        Err(err @ LoadError::InheritanceCycle { .. }) => {
            eprintln!("warning: {err}");
            Ok(())
        }
        other => other,
    }
}

fn chat(bot: &Interpreter, config: &CliConfig) -> io::Result<()> {
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        if interactive {
            write!(stdout, "You: ")?;
            stdout.flush()?;
        }
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "exit" {
            break;
        }

        if config.trace {
            let result = bot.reply_verbose(&config.user, message);
            debug_report::print_turn(&result.details, config.color);
            writeln!(stdout, "Bot: {}", result.reply)?;
        } else {
            writeln!(stdout, "Bot: {}", bot.reply(&config.user, message))?;
        }
    }
    Ok(())
}

fn parse_args() -> Result<CliConfig, String> {
    let defaults = Options::default();
    let mut scripts = Vec::new();
    let mut user = DEFAULT_USER.to_string();
    let mut depth = defaults.depth;
    let mut seed = None;
    let mut dump = false;
    let mut trace = false;
    let mut color = io::stdout().is_terminal();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("colloquy {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => color = true,
            "--no-color" => color = false,
            "--dump" => dump = true,
            "--trace" => trace = true,
            "--dir" | "-d" | "--file" | "-f" => {
                let value = args.next().ok_or_else(|| format!("error: {arg} expects a path"))?;
                scripts.push(Script::new(&arg, value));
            }
            "--user" | "-u" => {
                user = args.next().ok_or_else(|| "error: --user expects a value".to_string())?;
            }
            "--depth" => {
                let value = args.next().ok_or_else(|| "error: --depth expects a value".to_string())?;
                depth = parse_number(&value, "--depth")?;
            }
            "--seed" => {
                let value = args.next().ok_or_else(|| "error: --seed expects a value".to_string())?;
                seed = Some(parse_number(&value, "--seed")?);
            }
            _ if arg.starts_with("--dir=") => scripts.push(Script::Dir(arg.trim_start_matches("--dir=").into())),
            _ if arg.starts_with("--file=") => scripts.push(Script::File(arg.trim_start_matches("--file=").into())),
            _ if arg.starts_with("--user=") => user = arg.trim_start_matches("--user=").to_string(),
            _ if arg.starts_with("--depth=") => depth = parse_number(arg.trim_start_matches("--depth="), "--depth")?,
            _ if arg.starts_with("--seed=") => seed = Some(parse_number(arg.trim_start_matches("--seed="), "--seed")?),
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                let path = PathBuf::from(arg);
                scripts.push(if path.is_dir() { Script::Dir(path) } else { Script::File(path) });
            }
        }
    }

    if scripts.is_empty() {
        return Err(format!("error: no script path provided\n\n{}", help_text()));
    }
    if user.trim().is_empty() {
        return Err("error: --user cannot be empty".to_string());
    }

    Ok(CliConfig { scripts, user, depth, seed, dump, trace, color })
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value.parse().map_err(|_| format!("error: invalid {flag} '{value}' (expected a non-negative integer)"))
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "colloquy {version}

Interactive shell for rule-based dialogue scripts.

Usage:
  colloquy [OPTIONS] --dir <path>
  colloquy [OPTIONS] --file <path> [--file <path>...]
  colloquy [OPTIONS] <path>...

Bare paths may name a script file or a directory of scripts. Messages are
read from stdin one per line; `exit` or end of input ends the session.

Options:
  -d, --dir <path>           Load every script in a directory.
  -f, --file <path>          Load one script file. Repeatable.
  -u, --user <name>          User id for the session. Default: {user}
  --depth <n>                Redirect recursion limit. Default: {depth}
  --seed <n>                 Seed the random reply choice.
  --dump                     Print the sorted triggers after loading.
  --trace                    Print the resolution trace for every reply.
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  RUST_LOG                   Log filter, e.g. colloquy=debug. Default: warn

Exit codes:
  0  Success.
  1  Scripts failed to load, or stdin/stdout failed.
  2  Invalid arguments or missing script path.
",
        version = env!("CARGO_PKG_VERSION"),
        user = DEFAULT_USER,
        depth = Options::default().depth
    )
}
