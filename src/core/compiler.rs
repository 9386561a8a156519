// EN: src/core/compiler.rs

//! # Compiler
//!
//! Assembles the argument vector of a wrapped program from a [`WrapperConfig`]
//! and the invocation's [`Context`]. The order is fixed:
//!
//! 1. injected args, with the self token resolved,
//! 2. leading flags pulled out of the flag sections below,
//! 3. the marker,
//! 4. mapped flags, in mapping order,
//! 5. unknown flags, verbatim,
//! 6. forwarded positional args.
//!
//! Transforms then run over the result in registration order.

use crate::constants::SELF_TOKEN;
use crate::core::context::Context;
use crate::core::wrapper::{MappingKind, Target, WrapperConfig, WrapperError};
use std::path::PathBuf;

/// A program and the exact argv it will receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCommand {
    pub program: String,
    pub argv: Vec<String>,
}

/// Returns the program to run and the positional args to forward.
///
/// In dynamic mode the first positional arg is the program and is consumed.
/// The forwarded list is empty when forwarding is disabled.
pub fn resolve_target(config: &WrapperConfig, ctx: &Context) -> Result<(String, Vec<String>), WrapperError> {
    let (program, rest) = match &config.target {
        Target::Fixed(program) => (program.clone(), ctx.args()),
        Target::Dynamic => match ctx.args().split_first() {
            Some((program, rest)) if !program.is_empty() => (program.clone(), rest),
            _ => return Err(WrapperError::MissingTarget),
        },
    };
    let forwarded = if config.forward_args {
        rest.to_vec()
    } else {
        Vec::new()
    };
    Ok((program, forwarded))
}

fn self_path() -> Result<PathBuf, WrapperError> {
    let exe = std::env::current_exe().map_err(WrapperError::SelfPath)?;
    dunce::canonicalize(exe).map_err(WrapperError::SelfPath)
}

fn injected_args(config: &WrapperConfig) -> Result<Vec<String>, WrapperError> {
    if !config.inject.iter().any(|arg| arg.contains(SELF_TOKEN)) {
        return Ok(config.inject.clone());
    }
    let exe = self_path()?.to_string_lossy().into_owned();
    Ok(config
        .inject
        .iter()
        .map(|arg| arg.replace(SELF_TOKEN, &exe))
        .collect())
}

/// The flag name of a token, ignoring an inline `=value`.
fn flag_name(token: &str) -> &str {
    token.split_once('=').map_or(token, |(name, _)| name)
}

/// Mapped flags as token groups. A value mapping keeps its value next to the
/// flag so that relocation moves both.
fn mapped_groups(config: &WrapperConfig, ctx: &Context) -> Vec<Vec<String>> {
    let mut groups = Vec::new();
    for mapping in &config.mappings {
        match mapping.kind {
            MappingKind::Bool => {
                if ctx.local().bool(&mapping.flag).unwrap_or(false) {
                    groups.push(vec![mapping.external.clone()]);
                }
            }
            MappingKind::Value => {
                let Some(value) = ctx.local().get(&mapping.flag) else {
                    continue;
                };
                if value.is_zero() {
                    continue;
                }
                for item in value.to_arg_values() {
                    groups.push(vec![mapping.external.clone(), item]);
                }
            }
        }
    }
    groups
}

/// Runs steps 1 to 6 with `forwarded` as the positional args.
pub fn assemble(config: &WrapperConfig, ctx: &Context, forwarded: &[String]) -> Result<Vec<String>, WrapperError> {
    let mut argv = injected_args(config)?;

    let mut body = mapped_groups(config, ctx);
    if config.forward_unknown {
        body.extend(ctx.unknown_flags().iter().map(|token| vec![token.clone()]));
    }

    for wanted in &config.leading_flags {
        let (hits, rest): (Vec<_>, Vec<_>) = body.into_iter().partition(|group| {
            group
                .first()
                .is_some_and(|head| flag_name(head) == wanted.as_str())
        });
        argv.extend(hits.into_iter().flatten());
        body = rest;
    }

    if let Some(marker) = &config.marker {
        argv.push(marker.clone());
    }
    argv.extend(body.into_iter().flatten());
    argv.extend(forwarded.iter().cloned());
    Ok(argv)
}

/// Passes `argv` through every transform, in registration order.
pub fn apply_transforms(config: &WrapperConfig, ctx: &Context, argv: Vec<String>) -> Vec<String> {
    config
        .transforms()
        .iter()
        .fold(argv, |argv, transform| transform(ctx, argv))
}

/// Resolves the target and compiles the full argv. `BeforeExec` is not run.
pub fn compile(config: &WrapperConfig, ctx: &Context) -> Result<CompiledCommand, WrapperError> {
    let (program, forwarded) = resolve_target(config, ctx)?;
    let argv = assemble(config, ctx, &forwarded)?;
    let argv = apply_transforms(config, ctx, argv);
    log::trace!("Compiled '{}' with argv {:?}", program, argv);
    Ok(CompiledCommand { program, argv })
}
