// EN: src/core/wrapper.rs

//! # Wrapper
//!
//! Turns a declared command into an external-process invocation. The argv is
//! assembled by [`crate::core::compiler`]; this module owns the configuration
//! and the lifecycle around the execution: `BeforeExec`, compile, execute,
//! `AfterExec`.

use crate::constants::EXIT_CODE_KEY;
use crate::core::compiler;
use crate::core::context::Context;
use crate::core::errors::{ActionError, ActionResult};
use crate::core::pipeline::ActionFunc;
use crate::system::executor::{self, ExecError, ExecOptions, ExecResult, StdioPolicy};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WrapperError {
    #[error("No program to run: the first argument must name the target program.")]
    MissingTarget,
    #[error("Could not resolve the path of the running executable: {0}")]
    SelfPath(#[source] io::Error),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Command '{program}' exited with code {code}.")]
    NonZeroExit { program: String, code: i32 },
}

/// Which program the wrapper runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Fixed(String),
    /// The first positional argument names the program and is not forwarded.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Emits the bare external token when the flag is `true`.
    Bool,
    /// Emits `external value`, once per element for lists.
    Value,
}

/// Maps a local flag onto the wrapped program's own flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagMapping {
    pub flag: String,
    pub external: String,
    pub kind: MappingKind,
}

/// Rewrites the compiled argv.
pub type Transform = Arc<dyn Fn(&Context, Vec<String>) -> Vec<String> + Send + Sync>;

/// Receives the forwarded positional args and returns the ones to use. An
/// error aborts the command before anything is spawned.
pub type BeforeExec = Arc<dyn Fn(&Context, Vec<String>) -> Result<Vec<String>, ActionError> + Send + Sync>;

/// Sees every result; its error becomes the command's error.
pub type AfterExec = Arc<dyn Fn(&Context, &ExecResult) -> ActionResult + Send + Sync>;

#[derive(Clone)]
pub struct WrapperConfig {
    pub target: Target,
    /// Placed first. [`crate::constants::SELF_TOKEN`] is replaced with the
    /// absolute path of the running executable.
    pub inject: Vec<String>,
    /// Flags moved right after the injected prefix, in this order.
    pub leading_flags: Vec<String>,
    /// Inserted right after the leading flags.
    pub marker: Option<String>,
    pub mappings: Vec<FlagMapping>,
    pub forward_unknown: bool,
    pub forward_args: bool,
    pub stdio: StdioPolicy,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub(crate) transforms: Vec<Transform>,
    pub(crate) before_exec: Option<BeforeExec>,
    pub(crate) after_exec: Option<AfterExec>,
}

impl WrapperConfig {
    fn with_target(target: Target) -> Self {
        Self {
            target,
            inject: Vec::new(),
            leading_flags: Vec::new(),
            marker: None,
            mappings: Vec::new(),
            forward_unknown: false,
            forward_args: true,
            stdio: StdioPolicy::default(),
            env: HashMap::new(),
            cwd: None,
            transforms: Vec::new(),
            before_exec: None,
            after_exec: None,
        }
    }

    /// Wraps a fixed program.
    pub fn program(name: impl Into<String>) -> Self {
        Self::with_target(Target::Fixed(name.into()))
    }

    /// Takes the program from the first positional argument.
    pub fn dynamic() -> Self {
        Self::with_target(Target::Dynamic)
    }

    pub fn inject<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inject.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn leading_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn map_bool(mut self, flag: impl Into<String>, external: impl Into<String>) -> Self {
        self.mappings.push(FlagMapping {
            flag: flag.into(),
            external: external.into(),
            kind: MappingKind::Bool,
        });
        self
    }

    pub fn map_value(mut self, flag: impl Into<String>, external: impl Into<String>) -> Self {
        self.mappings.push(FlagMapping {
            flag: flag.into(),
            external: external.into(),
            kind: MappingKind::Value,
        });
        self
    }

    pub fn forward_unknown(mut self, forward: bool) -> Self {
        self.forward_unknown = forward;
        self
    }

    pub fn forward_args(mut self, forward: bool) -> Self {
        self.forward_args = forward;
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Context, Vec<String>) -> Vec<String> + Send + Sync + 'static,
    {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn stdio(mut self, stdio: StdioPolicy) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn before_exec<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, Vec<String>) -> Result<Vec<String>, ActionError> + Send + Sync + 'static,
    {
        self.before_exec = Some(Arc::new(hook));
        self
    }

    pub fn after_exec<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &ExecResult) -> ActionResult + Send + Sync + 'static,
    {
        self.after_exec = Some(Arc::new(hook));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            stdio: self.stdio,
            env: self.env.clone(),
            cwd: self.cwd.clone(),
        }
    }
}

impl fmt::Debug for WrapperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperConfig")
            .field("target", &self.target)
            .field("inject", &self.inject)
            .field("leading_flags", &self.leading_flags)
            .field("marker", &self.marker)
            .field("mappings", &self.mappings)
            .field("forward_unknown", &self.forward_unknown)
            .field("forward_args", &self.forward_args)
            .field("stdio", &self.stdio)
            .field("env", &self.env)
            .field("cwd", &self.cwd)
            .field("transforms", &self.transforms.len())
            .field("before_exec", &self.before_exec.is_some())
            .field("after_exec", &self.after_exec.is_some())
            .finish()
    }
}

// --- Lifecycle ---

/// The command's result for an execution when no `AfterExec` hook decides
/// it: failures and non-zero exits are errors.
pub fn outcome(result: &ExecResult) -> ActionResult {
    match &result.error {
        Some(ExecError::Cancelled { .. }) => Err(ActionError::Cancelled),
        Some(e) => Err(WrapperError::from(e.clone()).into()),
        None if result.exit_code != 0 => Err(WrapperError::NonZeroExit {
            program: result.program.clone(),
            code: result.exit_code,
        }
        .into()),
        None => Ok(()),
    }
}

/// Runs one wrapped execution for `ctx`.
pub async fn run_wrapper(config: &WrapperConfig, ctx: Context) -> ActionResult {
    let (program, forwarded) = compiler::resolve_target(config, &ctx)?;
    let forwarded = match &config.before_exec {
        Some(hook) => hook(&ctx, forwarded)?,
        None => forwarded,
    };
    let argv = compiler::assemble(config, &ctx, &forwarded)?;
    let argv = compiler::apply_transforms(config, &ctx, argv);

    let result = executor::execute(&program, &argv, &config.exec_options(), ctx.cancellation_token()).await;
    log::debug!(
        "'{}' finished in {:?} with exit code {}.",
        result.program,
        result.duration,
        result.exit_code
    );
    if result.error.is_none() {
        ctx.set(EXIT_CODE_KEY, i64::from(result.exit_code));
    }

    match &config.after_exec {
        Some(hook) => hook(&ctx, &result),
        None => outcome(&result),
    }
}

/// Builds the action of a wrapper command.
pub fn wrapper_action(config: WrapperConfig) -> ActionFunc {
    let config = Arc::new(config);
    Arc::new(move |ctx: Context| {
        let config = Arc::clone(&config);
        async move { run_wrapper(&config, ctx).await }.boxed()
    })
}
