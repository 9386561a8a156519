// EN: src/core/recovery.rs

//! Panic isolation for actions.
//!
//! Panics are caught around every poll of the action future, so a panic raised
//! while building the future and one raised after an `.await` are handled the
//! same way. Stack traces are captured by a process-wide panic hook that only
//! acts while a recovery scope is active on the panicking thread; panics
//! outside any scope still reach the previously installed hook.

use crate::constants::{DEFAULT_STACK_SIZE, PANIC_STACK_KEY, PANIC_VALUE_KEY};
use crate::core::context::Context;
use crate::core::errors::{ActionError, ActionResult, RecoveryError};
use crate::core::pipeline::{ActionFunc, ActionFuture, Middleware, middleware};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context as TaskContext, Poll};

// --- Panic Hook ---

thread_local! {
    /// (active scopes, capture requested) for the current thread.
    static SCOPE: Cell<(u32, bool)> = const { Cell::new((0, false)) };
    static CAPTURED_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let (depth, capture) = SCOPE.with(Cell::get);
            if depth == 0 {
                previous(info);
                return;
            }
            if capture {
                let stack = Backtrace::force_capture().to_string();
                CAPTURED_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            }
        }));
    });
}

/// Marks the current thread as running inside a recovery scope until dropped.
struct ScopeGuard {
    previous: (u32, bool),
}

impl ScopeGuard {
    fn enter(capture: bool) -> Self {
        let previous = SCOPE.with(Cell::get);
        SCOPE.with(|s| s.set((previous.0 + 1, previous.1 || capture)));
        Self { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE.with(|s| s.set(self.previous));
    }
}

// --- Catching ---

/// What a caught panic left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicReport {
    /// The panic payload rendered as text.
    pub message: String,
    pub stack: Option<String>,
}

/// Renders a panic payload. `panic!` produces `&str` or `String` payloads;
/// anything else is reported generically.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn truncate_stack(mut stack: String, max: usize) -> String {
    if stack.len() > max {
        let mut cut = max;
        while !stack.is_char_boundary(cut) {
            cut -= 1;
        }
        stack.truncate(cut);
    }
    stack
}

/// Polls an action future, turning a panic in any poll into a [`PanicReport`].
struct CatchPanic {
    inner: ActionFuture,
    capture_stack: bool,
    stack_size: usize,
}

impl Future for CatchPanic {
    type Output = Result<ActionResult, PanicReport>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = {
            let _scope = ScopeGuard::enter(this.capture_stack);
            panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx)))
        };
        match polled {
            Ok(Poll::Ready(result)) => Poll::Ready(Ok(result)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => {
                let stack = CAPTURED_STACK
                    .with(|slot| slot.borrow_mut().take())
                    .filter(|_| this.capture_stack)
                    .map(|s| truncate_stack(s, this.stack_size));
                Poll::Ready(Err(PanicReport {
                    message: payload_message(payload.as_ref()),
                    stack,
                }))
            }
        }
    }
}

/// Runs `next(ctx)` and converts any panic it raises into a [`PanicReport`].
/// Used by the recovery middleware and at the timeout engine's task boundary.
pub(crate) async fn catch_panic(
    next: ActionFunc,
    ctx: Context,
    capture_stack: bool,
    stack_size: usize,
) -> Result<ActionResult, PanicReport> {
    install_panic_hook();
    // Calling `next` happens inside the first poll, so a panic while building
    // the future is caught too.
    let inner = async move { next(ctx).await }.boxed();
    CatchPanic {
        inner,
        capture_stack,
        stack_size,
    }
    .await
}

// --- Configuration ---

/// Options for [`recovery_with_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    pub capture_stack: bool,
    /// Maximum stack trace size in bytes.
    pub stack_size: usize,
    /// Log the panic (and stack, if captured) through the `log` facade.
    pub log_stack: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            capture_stack: true,
            stack_size: DEFAULT_STACK_SIZE,
            log_stack: true,
        }
    }
}

impl RecoveryConfig {
    pub fn capture_stack(mut self, enabled: bool) -> Self {
        self.capture_stack = enabled;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn log_stack(mut self, enabled: bool) -> Self {
        self.log_stack = enabled;
        self
    }
}

/// Maps a caught panic to the error the command returns.
pub type PanicHandler = Arc<dyn Fn(&Context, PanicReport) -> ActionError + Send + Sync>;

// --- Stats ---

/// Counts recovered panics. Safe to share between concurrent invocations.
#[derive(Debug, Default)]
pub struct RecoveryStats {
    total: AtomicU64,
    by_command: Mutex<HashMap<String, u64>>,
    last_panic: Mutex<Option<String>>,
}

impl RecoveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, command: &str, message: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.by_command.lock().entry(command.to_string()).or_insert(0) += 1;
        *self.last_panic.lock() = Some(message.to_string());
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn for_command(&self, command: &str) -> u64 {
        self.by_command.lock().get(command).copied().unwrap_or(0)
    }

    pub fn last_panic(&self) -> Option<String> {
        self.last_panic.lock().clone()
    }
}

// --- Middleware Constructors ---

fn recover_with(config: RecoveryConfig, handler: PanicHandler) -> Middleware {
    middleware(move |next: ActionFunc| {
        let config = config.clone();
        let handler = Arc::clone(&handler);
        Arc::new(move |ctx: Context| {
            let next = Arc::clone(&next);
            let handler = Arc::clone(&handler);
            let capture = config.capture_stack;
            let size = config.stack_size;
            async move {
                match catch_panic(next, ctx.clone(), capture, size).await {
                    Ok(result) => result,
                    Err(report) => Err(handler(&ctx, report)),
                }
            }
            .boxed()
        })
    })
}

fn to_recovery_error(ctx: &Context, report: PanicReport) -> RecoveryError {
    RecoveryError {
        panic: report.message,
        command: ctx.command().name.clone(),
        stack: report.stack,
    }
}

/// Converts panics into [`RecoveryError`]s, capturing and logging the stack.
pub fn recovery() -> Middleware {
    recovery_with_config(RecoveryConfig::default())
}

pub fn recovery_with_config(config: RecoveryConfig) -> Middleware {
    let log_stack = config.log_stack;
    recover_with(
        config,
        Arc::new(move |ctx: &Context, report: PanicReport| {
            let err = to_recovery_error(ctx, report);
            if log_stack {
                log::error!("{}", err);
                if let Some(stack) = &err.stack {
                    log::error!("Stack trace:\n{}", stack);
                }
            }
            err.into()
        }),
    )
}

/// Lets panics propagate. Meant for development builds where a crash should
/// reach the process.
pub fn no_recovery() -> Middleware {
    middleware(|next| next)
}

/// Uses `handler` to map each caught panic to an error.
pub fn recovery_with_handler(config: RecoveryConfig, handler: PanicHandler) -> Middleware {
    recover_with(config, handler)
}

/// Always captures the stack but never prints it. The panic message and stack
/// are published in the metadata bag under [`PANIC_VALUE_KEY`] and
/// [`PANIC_STACK_KEY`].
pub fn safe_recovery() -> Middleware {
    let config = RecoveryConfig::default().capture_stack(true).log_stack(false);
    recover_with(
        config,
        Arc::new(|ctx: &Context, report: PanicReport| {
            ctx.set(PANIC_VALUE_KEY, report.message.clone());
            if let Some(stack) = &report.stack {
                ctx.set(PANIC_STACK_KEY, stack.clone());
            }
            to_recovery_error(ctx, report).into()
        }),
    )
}

/// Like [`recovery_with_config`], additionally counting panics in `stats`.
pub fn recovery_with_stats(config: RecoveryConfig, stats: Arc<RecoveryStats>) -> Middleware {
    let log_stack = config.log_stack;
    recover_with(
        config,
        Arc::new(move |ctx: &Context, report: PanicReport| {
            stats.record(&ctx.command().name, &report.message);
            let err = to_recovery_error(ctx, report);
            if log_stack {
                log::error!("{}", err);
            }
            err.into()
        }),
    )
}
