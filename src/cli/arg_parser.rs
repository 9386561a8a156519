// EN: src/cli/arg_parser.rs

use crate::core::context::{Context, FlagValue, Flags};
use tokio_util::sync::CancellationToken;

/// Classifies the arguments handed to a wrapped program.
///
/// # Logic:
/// - Any token starting with `-` or `--` is a flag. A flag never consumes the
///   next token; only `--key=value` carries a value. This keeps every token in
///   its original position when it is forwarded.
/// - A bare `-` is positional.
/// - After `--`, every token is positional. The `--` itself is dropped.
#[derive(Debug, Clone, Default)]
pub struct ParsedArgs {
    raw: Vec<String>,
    positional: Vec<String>,
    flag_tokens: Vec<String>,
    flags: Flags,
}

impl ParsedArgs {
    pub fn new(params: &[String]) -> Self {
        let mut parsed = Self {
            raw: params.to_vec(),
            ..Self::default()
        };
        let mut params_iter = params.iter();

        while let Some(param) = params_iter.next() {
            if param == "--" {
                parsed.positional.extend(params_iter.by_ref().cloned());
                break;
            }

            let name_opt = if let Some(name) = param.strip_prefix("--") {
                Some(name)
            } else {
                param.strip_prefix('-')
            };

            match name_opt {
                Some(name) if !name.is_empty() => {
                    let (key, value) = match name.split_once('=') {
                        Some((key, value)) => (key, FlagValue::from(value)),
                        None => (name, FlagValue::Bool(true)),
                    };
                    parsed.flags.set(key, value);
                    parsed.flag_tokens.push(param.clone());
                }
                _ => parsed.positional.push(param.clone()),
            }
        }

        parsed
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Flag tokens, verbatim and in order.
    pub fn flag_tokens(&self) -> &[String] {
        &self.flag_tokens
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Builds the invocation context. Parsed flags become explicitly set
    /// local flags and are also kept as unknown tokens so they can be
    /// forwarded untouched.
    pub fn into_context(self, command: &str, global: Flags, token: CancellationToken) -> Context {
        Context::builder(command)
            .local_flags(self.flags)
            .global_flags(global)
            .args(self.positional)
            .raw_args(self.raw)
            .unknown_flags(self.flag_tokens)
            .cancellation(token)
            .build()
    }
}
