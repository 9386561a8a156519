// EN: src/cli/mod.rs

use crate::core::logger::{LogFormat, LogLevel, LogOutput};
use clap::Parser;
use std::time::Duration;

pub mod arg_parser;
pub mod exit_codes;
pub mod runner;

/// cmdflow: runs an external program through a logging, recovery, validation
/// and timeout pipeline.
///
/// Everything after PROGRAM is handed to the program. Flags there are
/// forwarded verbatim; they can also be constrained with `--require-one-of`
/// and moved to the front with `--lead`.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// Time bound for the program (e.g. `500ms`, `30s`, `2m`). `0` disables it.
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub timeout: Duration,

    /// Extra time the program gets after the deadline fires.
    #[arg(long, value_parser = parse_duration)]
    pub grace: Option<Duration>,

    /// How many more times to run the program after a timeout.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[arg(long, value_enum, default_value_t = LogOutput::Stderr)]
    pub log_output: LogOutput,

    /// Include the forwarded arguments in log records.
    #[arg(long)]
    pub include_args: bool,

    /// Collect the program's output and print it once it exits.
    #[arg(long)]
    pub capture: bool,

    /// Arguments placed before everything else, split like a shell would.
    /// `@self` stands for the path of cmdflow itself.
    #[arg(long, value_name = "STRING", allow_hyphen_values = true)]
    pub inject: Option<String>,

    /// A forwarded flag to move right after the injected arguments. Repeatable.
    #[arg(long = "lead", value_name = "FLAG", allow_hyphen_values = true)]
    pub lead: Vec<String>,

    /// A literal argument inserted after the leading flags.
    #[arg(long, value_name = "STRING", allow_hyphen_values = true)]
    pub marker: Option<String>,

    /// Forwarded flags of which exactly one must be given (names without dashes).
    #[arg(long, value_delimiter = ',', value_name = "FLAG")]
    pub require_one_of: Vec<String>,

    /// Set environment variables for the program (e.g., "KEY=VALUE"). Repeatable.
    #[arg(long, value_delimiter = ',', value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Working directory for the program.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<String>,

    /// The program to run.
    pub program: String,

    /// All remaining arguments, passed to the program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Parses `1500ms`, `30s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("'{}' is not a valid duration.", input))?;

    let seconds = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("Unknown duration unit '{}' in '{}'.", other, input)),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("'{}' is out of range: {}", input, e))
}
