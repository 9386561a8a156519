// EN: src/cli/runner.rs

//! Builds the pipeline, the wrapper and the context for one `cmdflow`
//! invocation and runs it.

use crate::cli::Cli;
use crate::cli::arg_parser::ParsedArgs;
use crate::core::context::{Context, Flags};
use crate::core::errors::{ActionResult, ValidationError};
use crate::core::flag_groups::{FlagGroup, FlagGroups, GroupKind};
use crate::core::logger::{LoggerConfig, logger};
use crate::core::pipeline::{Chain, Pipeline};
use crate::core::recovery::recovery;
use crate::core::timeout::{TimeoutConfig, timeout_with_config};
use crate::core::validator::{ValidatorFn, dir_exists, validator};
use crate::core::wrapper::{self, WrapperConfig, wrapper_action};
use crate::system::executor::{ExecResult, StdioPolicy};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Global flag holding the `--timeout` value.
pub const TIMEOUT_FLAG: &str = "timeout";
/// Global flag holding the `--cwd` value.
pub const CWD_FLAG: &str = "cwd";

/// cmdflow's own options, as seen by the pipeline.
fn global_flags(cli: &Cli) -> Flags {
    let mut flags = Flags::new();
    flags.set(TIMEOUT_FLAG, cli.timeout);
    if let Some(cwd) = &cli.cwd {
        flags.set(CWD_FLAG, cwd.as_str());
    }
    flags
}

pub fn build_context(cli: &Cli, cancellation_token: CancellationToken) -> Context {
    ParsedArgs::new(&cli.args).into_context(&cli.program, global_flags(cli), cancellation_token)
}

/// Logger outermost, then recovery, validation and the time bound.
pub fn build_pipeline(cli: &Cli) -> Result<Pipeline, ValidationError> {
    let logger_config = LoggerConfig::default()
        .level(cli.log_level)
        .format(cli.log_format)
        .output(cli.log_output)
        .include_args(cli.include_args);

    let mut checks: HashMap<String, ValidatorFn> = HashMap::new();
    checks.insert(CWD_FLAG.to_string(), dir_exists(&[CWD_FLAG]));

    let mut chain = Chain::new([logger(logger_config), recovery(), validator(checks)]);
    if !cli.timeout.is_zero() {
        let mut config = TimeoutConfig::new(cli.timeout).retries(cli.retries);
        if let Some(grace) = cli.grace {
            config = config.grace(grace);
        }
        chain = chain.append(timeout_with_config(config));
    }

    let mut groups = FlagGroups::new();
    if !cli.require_one_of.is_empty() {
        let group = FlagGroup::new(
            "require-one-of",
            GroupKind::ExactlyOne,
            cli.require_one_of.iter().cloned(),
        )
        .map_err(|e| ValidationError::new("require-one-of", e.to_string()))?
        .with_description("Declared with --require-one-of.");
        groups
            .add(group)
            .map_err(|e| ValidationError::new("require-one-of", e.to_string()))?;
    }

    Ok(Pipeline::new(chain).with_groups(groups))
}

/// Prints what a captured run wrote, then applies the default outcome.
fn replay_captured(_ctx: &Context, result: &ExecResult) -> ActionResult {
    if let Some(stdout) = &result.stdout {
        print!("{}", stdout);
    }
    if let Some(stderr) = &result.stderr {
        eprint!("{}", stderr);
    }
    wrapper::outcome(result)
}

pub fn build_wrapper(cli: &Cli) -> Result<WrapperConfig, ValidationError> {
    let mut config = WrapperConfig::program(cli.program.as_str())
        .leading_flags(cli.lead.iter().cloned())
        .forward_unknown(true);

    if let Some(inject) = &cli.inject {
        let parts = shlex::split(inject).ok_or_else(|| {
            ValidationError::new("inject", "Could not be split into arguments.").with_value(inject.as_str())
        })?;
        config = config.inject(parts);
    }
    if let Some(marker) = &cli.marker {
        config = config.marker(marker.as_str());
    }
    for pair in &cli.env {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ValidationError::new("env", "Expected KEY=VALUE.").with_value(pair.as_str()))?;
        config = config.env(key, value);
    }
    if let Some(cwd) = &cli.cwd {
        config = config.cwd(shellexpand::tilde(cwd).into_owned());
    }
    if cli.capture {
        config = config.stdio(StdioPolicy::Capture).after_exec(replay_captured);
    }
    Ok(config)
}

/// Runs the program described by `cli`. Cancelling `cancellation_token`
/// stops the invocation and kills the child.
pub async fn run(cli: Cli, cancellation_token: CancellationToken) -> ActionResult {
    log::debug!("CLI args parsed: {:?}", cli);
    let pipeline = build_pipeline(&cli)?;
    let action = wrapper_action(build_wrapper(&cli)?);
    let ctx = build_context(&cli, cancellation_token);
    pipeline.run(&action, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["cmdflow"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_wrapper_reflects_options() {
        let cli = cli(&[
            "--inject",
            "-c 'echo \"$0\"'",
            "--lead",
            "-q",
            "--marker",
            "::",
            "--env",
            "A=1,B=2",
            "sh",
            "file",
            "-q",
        ]);
        let config = build_wrapper(&cli).unwrap();
        assert_eq!(config.env.get("B").map(String::as_str), Some("2"));

        let ctx = build_context(&cli, CancellationToken::new());
        let compiled = compiler::compile(&config, &ctx).unwrap();
        assert_eq!(compiled.program, "sh");
        assert_eq!(compiled.argv, ["-c", "echo \"$0\"", "-q", "::", "file"]);
    }

    #[test]
    fn test_bad_env_pair_is_rejected() {
        let err = build_wrapper(&cli(&["--env", "NOPE", "true"])).unwrap_err();
        assert_eq!(err.field, "env");
        assert_eq!(err.value.as_deref(), Some("NOPE"));
    }

    #[test]
    fn test_context_carries_global_options() {
        let cli = cli(&["--timeout", "2s", "--cwd", "/tmp", "ls", "-l"]);
        let ctx = build_context(&cli, CancellationToken::new());
        assert_eq!(ctx.global().duration(TIMEOUT_FLAG), Some(std::time::Duration::from_secs(2)));
        assert_eq!(ctx.global().string(CWD_FLAG), Some("/tmp"));
        assert!(ctx.local().bool("l").unwrap_or(false));
    }

    #[test]
    fn test_duplicate_group_members_are_rejected() {
        let err = build_pipeline(&cli(&["--require-one-of", "json,json", "true"])).unwrap_err();
        assert_eq!(err.field, "require-one-of");
    }

    #[test]
    fn test_zero_timeout_drops_the_layer() {
        let bounded = build_pipeline(&cli(&["true"])).unwrap();
        let unbounded = build_pipeline(&cli(&["--timeout", "0", "true"])).unwrap();
        assert_eq!(bounded.chain().len(), 4);
        assert_eq!(unbounded.chain().len(), 3);
    }
}
