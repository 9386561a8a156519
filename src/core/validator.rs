// EN: src/core/validator.rs

use crate::core::context::Context;
use crate::core::errors::{ActionError, ActionResult, ValidationError};
use crate::core::pipeline::{ActionFunc, Middleware, middleware};
use futures::FutureExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A check run against the context before the action.
pub type ValidatorFn = Arc<dyn Fn(&Context) -> ActionResult + Send + Sync>;

/// A named set of checks. Iteration order is unspecified; checks must not
/// depend on each other.
#[derive(Clone, Default)]
pub struct Validators {
    checks: HashMap<String, ValidatorFn>,
}

impl Validators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `check` under `name`, replacing any previous check with the
    /// same name.
    pub fn add<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Context) -> ActionResult + Send + Sync + 'static,
    {
        self.checks.insert(name.into(), Arc::new(check));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs every check, stopping at the first failure.
    pub fn check(&self, ctx: &Context) -> ActionResult {
        for (name, check) in &self.checks {
            match check(ctx) {
                Ok(()) => {}
                Err(ActionError::Validation(e)) => return Err(e.into()),
                Err(other) => return Err(ValidationError::wrap(name.as_str(), other).into()),
            }
        }
        Ok(())
    }

    pub fn into_middleware(self) -> Middleware {
        let validators = Arc::new(self);
        middleware(move |next: ActionFunc| {
            let validators = Arc::clone(&validators);
            Arc::new(move |ctx: Context| {
                let validators = Arc::clone(&validators);
                let next = Arc::clone(&next);
                async move {
                    if let Err(e) = validators.check(&ctx) {
                        log::debug!("Command '{}' rejected: {}", ctx.command().name, e);
                        return Err(e);
                    }
                    next(ctx).await
                }
                .boxed()
            })
        })
    }
}

/// Runs the checks in `checks` before the action; the action only runs when
/// all pass.
pub fn validator(checks: HashMap<String, ValidatorFn>) -> Middleware {
    Validators { checks }.into_middleware()
}

// --- Built-in Checks ---

/// When `condition` holds, every flag in `flags` must carry a non-zero value
/// in the local or global scope.
pub fn required_if<C>(condition: C, flags: &[&str]) -> ValidatorFn
where
    C: Fn(&Context) -> bool + Send + Sync + 'static,
{
    let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
    Arc::new(move |ctx: &Context| {
        if !condition(ctx) {
            return Ok(());
        }
        for flag in &flags {
            let present = ctx.lookup(flag).is_some_and(|v| !v.is_zero());
            if !present {
                return Err(ValidationError::new(
                    flag.as_str(),
                    format!("Flag '--{}' is required in this context.", flag),
                )
                .into());
            }
        }
        Ok(())
    })
}

#[derive(Clone, Copy)]
enum PathKind {
    File,
    Dir,
}

impl PathKind {
    fn noun(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "directory",
        }
    }
}

fn path_check(flags: &[&str], kind: PathKind) -> ValidatorFn {
    let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
    Arc::new(move |ctx: &Context| {
        for flag in &flags {
            let raw = match ctx
                .local()
                .string(flag)
                .or_else(|| ctx.global().string(flag))
            {
                Some(raw) if !raw.is_empty() => raw,
                // Unset flags are not this check's concern.
                _ => continue,
            };
            let expanded = shellexpand::full(raw).map_err(|e| {
                ValidationError::new(flag.as_str(), format!("Could not expand path: {}", e))
                    .with_value(raw)
            })?;
            let path = PathBuf::from(expanded.as_ref());

            let metadata = match path.metadata() {
                Ok(metadata) => metadata,
                Err(_) => {
                    return Err(ValidationError::new(
                        flag.as_str(),
                        format!("{} not found: {}", capitalized(kind.noun()), path.display()),
                    )
                    .with_value(raw)
                    .into());
                }
            };
            let matches = match kind {
                PathKind::File => metadata.is_file(),
                PathKind::Dir => metadata.is_dir(),
            };
            if !matches {
                return Err(ValidationError::new(
                    flag.as_str(),
                    format!("Path is not a {}: {}", kind.noun(), path.display()),
                )
                .with_value(raw)
                .into());
            }
        }
        Ok(())
    })
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Each of `flags`, when set, must name an existing regular file.
pub fn file_exists(flags: &[&str]) -> ValidatorFn {
    path_check(flags, PathKind::File)
}

/// Each of `flags`, when set, must name an existing directory.
pub fn dir_exists(flags: &[&str]) -> ValidatorFn {
    path_check(flags, PathKind::Dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::action;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn counting_action(ran: Arc<AtomicBool>) -> ActionFunc {
        action(move |_ctx| {
            let ran = Arc::clone(&ran);
            async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn validation(result: ActionResult) -> ValidationError {
        match result {
            Err(ActionError::Validation(e)) => e,
            other => panic!("Expected a validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_short_circuits_the_action() {
        let ran = Arc::new(AtomicBool::new(false));
        let layer = Validators::new()
            .add("always", |_ctx: &Context| {
                Err(ValidationError::new("name", "must not be empty").into())
            })
            .into_middleware();

        let err = validation(layer(counting_action(Arc::clone(&ran)))(Context::builder("c").build()).await);
        assert_eq!(err.field, "name");
        assert!(err.cause.is_none());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_other_errors_are_wrapped_with_validator_name() {
        let mut checks: HashMap<String, ValidatorFn> = HashMap::new();
        checks.insert(
            "port_free".to_string(),
            Arc::new(|_ctx: &Context| Err(ActionError::Other(anyhow::anyhow!("port 80 in use")))),
        );

        let ran = Arc::new(AtomicBool::new(false));
        let err = validation(validator(checks)(counting_action(Arc::clone(&ran)))(Context::builder("c").build()).await);
        assert_eq!(err.field, "port_free");
        assert_eq!(err.message, "port 80 in use");
        assert!(err.cause.is_some());
    }

    #[tokio::test]
    async fn test_passing_checks_run_the_action() {
        let ran = Arc::new(AtomicBool::new(false));
        let layer = Validators::new().add("ok", |_ctx: &Context| Ok(())).into_middleware();
        layer(counting_action(Arc::clone(&ran)))(Context::builder("c").build())
            .await
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_required_if() {
        let check = required_if(|ctx| ctx.local().bool("upload").unwrap_or(false), &["bucket"]);

        let skipped = Context::builder("c").build();
        assert!(check(&skipped).is_ok());

        let missing = Context::builder("c").flag("upload", true).build();
        let err = validation(check(&missing));
        assert_eq!(err.field, "bucket");

        let empty = Context::builder("c")
            .flag("upload", true)
            .flag("bucket", "")
            .build();
        assert!(check(&empty).is_err());

        let global = Context::builder("c")
            .flag("upload", true)
            .global_flag("bucket", "assets")
            .build();
        assert!(check(&global).is_ok());
    }

    #[test]
    fn test_file_and_dir_checks_distinguish_missing_from_wrong_type() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "x = 1").unwrap();
        let file_str = file.to_string_lossy().to_string();
        let dir_str = dir.path().to_string_lossy().to_string();

        let ok = Context::builder("c").flag("config", file_str.as_str()).build();
        assert!(file_exists(&["config"])(&ok).is_ok());

        let wrong_type = Context::builder("c").flag("config", dir_str.as_str()).build();
        let err = validation(file_exists(&["config"])(&wrong_type));
        assert!(err.message.starts_with("Path is not a file"));
        assert!(dir_exists(&["config"])(&wrong_type).is_ok());

        let missing = Context::builder("c")
            .global_flag("config", dir.path().join("nope").to_string_lossy().to_string())
            .build();
        let err = validation(file_exists(&["config"])(&missing));
        assert!(err.message.starts_with("File not found"));
        assert!(err.value.is_some());

        let err = validation(dir_exists(&["config"])(&ok));
        assert!(err.message.starts_with("Path is not a directory"));
    }

    #[test]
    fn test_unset_path_flags_are_ignored() {
        let ctx = Context::builder("c").build();
        assert!(file_exists(&["config"])(&ctx).is_ok());
        assert!(dir_exists(&["out"])(&ctx).is_ok());
    }
}
