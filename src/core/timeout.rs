// EN: src/core/timeout.rs

//! Bounded execution.
//!
//! Every variant is built on one primitive: the action runs as a spawned task
//! while the caller races (1) its completion, (2) a deadline and (3) the
//! invocation's external cancellation. Each attempt runs under a child
//! cancellation signal, which the deadline fires so that cooperative code can
//! stop. A timed-out task is abandoned, not aborted: it keeps running until it
//! returns and its result is dropped.

use crate::constants::{DEFAULT_STACK_SIZE, DEFAULT_TIMEOUT};
use crate::core::context::Context;
use crate::core::errors::{ActionError, ActionResult, RecoveryError, TimeoutError};
use crate::core::pipeline::{ActionFunc, Middleware, middleware};
use crate::core::recovery;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinError;

/// Computes the bound for one invocation. `None` or a zero duration means
/// "run without a bound".
pub type DurationSource = Arc<dyn Fn(&Context) -> Option<Duration> + Send + Sync>;

/// Called synchronously with the command name and the configured duration
/// before a [`TimeoutError`] is returned.
pub type TimeoutCallback = Arc<dyn Fn(&str, Duration) + Send + Sync>;

// --- Configuration ---

/// Options for [`timeout_with_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub duration: Duration,
    /// Extra time a cancelled task gets to report its own result.
    pub grace: Option<Duration>,
    /// Additional attempts made when an attempt times out.
    pub retries: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_TIMEOUT,
            grace: None,
            retries: 0,
        }
    }
}

impl TimeoutConfig {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

// --- Stats ---

/// Timeout counters. Safe to share between concurrent invocations.
#[derive(Debug, Default)]
pub struct TimeoutStats {
    total: AtomicU64,
    by_command: Mutex<HashMap<String, u64>>,
    elapsed: Mutex<Duration>,
}

impl TimeoutStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, command: &str, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.by_command.lock().entry(command.to_string()).or_insert(0) += 1;
        let mut total_elapsed = self.elapsed.lock();
        *total_elapsed = total_elapsed.saturating_add(elapsed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn for_command(&self, command: &str) -> u64 {
        self.by_command.lock().get(command).copied().unwrap_or(0)
    }

    /// Wall-clock time spent in attempts that ended in a timeout.
    pub fn total_elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.by_command.lock().clone()
    }
}

// --- Core Primitive ---

fn settle(joined: Result<ActionResult, JoinError>, command: &str) -> ActionResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(RecoveryError {
            panic: recovery::payload_message(e.into_panic().as_ref()),
            command: command.to_string(),
            stack: None,
        }
        .into()),
        // The runtime is shutting down.
        Err(_) => Err(ActionError::Cancelled),
    }
}

/// Runs one bounded attempt of `next`.
async fn run_bounded(
    next: ActionFunc,
    ctx: Context,
    duration: Duration,
    grace: Option<Duration>,
) -> ActionResult {
    let command = ctx.command().name.clone();
    let attempt = ctx.child();

    let task_ctx = attempt.clone();
    let task_command = command.clone();
    let mut task = tokio::spawn(async move {
        // Panics never cross the task boundary unconverted.
        match recovery::catch_panic(next, task_ctx, true, DEFAULT_STACK_SIZE).await {
            Ok(result) => result,
            Err(report) => Err(RecoveryError {
                panic: report.message,
                command: task_command,
                stack: report.stack,
            }
            .into()),
        }
    });

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    tokio::select! {
        biased;
        joined = &mut task => return settle(joined, &command),
        _ = &mut deadline => {}
        _ = ctx.cancelled() => {
            log::debug!("Command '{}' was cancelled externally.", command);
            return Err(ActionError::Cancelled);
        }
    }

    log::debug!("Command '{}' hit its {:?} deadline.", command, duration);
    attempt.cancel();

    if let Some(grace) = grace {
        if let Ok(joined) = tokio::time::timeout(grace, &mut task).await {
            log::debug!("Command '{}' finished within its grace period.", command);
            return match settle(joined, &command) {
                // The task stopped because of our own deadline, not an external signal.
                Err(ActionError::Cancelled) if !ctx.is_cancelled() => {
                    Err(TimeoutError { duration, command }.into())
                }
                other => other,
            };
        }
    }

    Err(TimeoutError { duration, command }.into())
}

// --- Composition ---

/// The parameters shared by every timeout variant.
#[derive(Clone)]
struct Bound {
    source: DurationSource,
    grace: Option<Duration>,
    retries: u32,
    callback: Option<TimeoutCallback>,
    stats: Option<Arc<TimeoutStats>>,
}

impl Bound {
    fn fixed(duration: Duration) -> Self {
        Self::from_source(Arc::new(move |_: &Context| Some(duration)))
    }

    fn from_source(source: DurationSource) -> Self {
        Self {
            source,
            grace: None,
            retries: 0,
            callback: None,
            stats: None,
        }
    }

    async fn run(&self, next: ActionFunc, ctx: Context) -> ActionResult {
        let duration = match (self.source)(&ctx) {
            Some(d) if !d.is_zero() => d,
            _ => return next(ctx).await,
        };

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = run_bounded(Arc::clone(&next), ctx.clone(), duration, self.grace).await;

            let err = match result {
                Err(ActionError::Timeout(err)) => err,
                other => return other,
            };
            if let Some(stats) = &self.stats {
                stats.record(&err.command, started.elapsed());
            }
            if let Some(callback) = &self.callback {
                callback(&err.command, err.duration);
            }
            if attempt >= self.retries {
                return Err(err.into());
            }
            attempt += 1;
            log::warn!(
                "Command '{}' timed out after {:?}, retrying ({}/{}).",
                err.command,
                err.duration,
                attempt,
                self.retries
            );
        }
    }

    fn into_middleware(self) -> Middleware {
        let bound = Arc::new(self);
        middleware(move |next: ActionFunc| {
            let bound = Arc::clone(&bound);
            Arc::new(move |ctx: Context| {
                let bound = Arc::clone(&bound);
                let next = Arc::clone(&next);
                async move { bound.run(next, ctx).await }.boxed()
            })
        })
    }
}

// --- Middleware Constructors ---

/// Bounds the action to `duration`.
pub fn timeout(duration: Duration) -> Middleware {
    Bound::fixed(duration).into_middleware()
}

pub fn timeout_with_config(config: TimeoutConfig) -> Middleware {
    let mut bound = Bound::fixed(config.duration);
    bound.grace = config.grace;
    bound.retries = config.retries;
    bound.into_middleware()
}

/// Fires the cancellation signal after `duration`, then gives the action
/// `grace` more to report its own result before timing out.
pub fn graceful_timeout(duration: Duration, grace: Duration) -> Middleware {
    timeout_with_config(TimeoutConfig::new(duration).grace(grace))
}

/// Picks the bound by command name, falling back to `default`.
pub fn per_command_timeout(durations: HashMap<String, Duration>, default: Duration) -> Middleware {
    Bound::from_source(Arc::new(move |ctx: &Context| {
        Some(
            durations
                .get(&ctx.command().name)
                .copied()
                .unwrap_or(default),
        )
    }))
    .into_middleware()
}

pub fn timeout_with_callback(duration: Duration, callback: TimeoutCallback) -> Middleware {
    let mut bound = Bound::fixed(duration);
    bound.callback = Some(callback);
    bound.into_middleware()
}

/// Re-runs the bounded action up to `retries` more times, only after timeouts.
pub fn timeout_with_retry(duration: Duration, retries: u32) -> Middleware {
    timeout_with_config(TimeoutConfig::new(duration).retries(retries))
}

/// Computes the bound from the context on every invocation.
pub fn dynamic_timeout<F>(compute: F) -> Middleware
where
    F: Fn(&Context) -> Option<Duration> + Send + Sync + 'static,
{
    Bound::from_source(Arc::new(compute)).into_middleware()
}

/// Reads the bound from a duration flag (local scope, then global), or uses
/// `default` when the flag is absent.
pub fn timeout_from_flag(flag: impl Into<String>, default: Duration) -> Middleware {
    let flag = flag.into();
    dynamic_timeout(move |ctx| {
        Some(
            ctx.local()
                .duration(&flag)
                .or_else(|| ctx.global().duration(&flag))
                .unwrap_or(default),
        )
    })
}

pub fn timeout_with_stats(duration: Duration, stats: Arc<TimeoutStats>) -> Middleware {
    let mut bound = Bound::fixed(duration);
    bound.stats = Some(stats);
    bound.into_middleware()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::action;
    use std::sync::atomic::AtomicUsize;

    fn ctx(name: &str) -> Context {
        Context::builder(name).build()
    }

    fn sleeper(duration: Duration) -> ActionFunc {
        action(move |_ctx| async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_timeout_returns_error_without_waiting_for_task() {
        let d = Duration::from_millis(50);
        let started = Instant::now();
        let result = timeout(d)(sleeper(d * 2))(ctx("slow")).await;

        let elapsed = started.elapsed();
        match result {
            Err(ActionError::Timeout(e)) => {
                assert_eq!(e.duration, d);
                assert_eq!(e.command, "slow");
            }
            other => panic!("Unexpected result: {:?}", other),
        }
        assert!(elapsed < d + Duration::from_millis(40), "Took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_fast_action_completes() {
        let result = timeout(Duration::from_secs(1))(sleeper(Duration::from_millis(5)))(ctx("fast")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_action_errors_are_returned_verbatim() {
        let failing = action(|_ctx| async { Err(ActionError::Other(anyhow::anyhow!("disk full"))) });
        let err = timeout(Duration::from_secs(1))(failing)(ctx("write")).await.unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[tokio::test]
    async fn test_deadline_cancels_the_attempt_context() {
        let observed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&observed);
        let cooperative = action(move |ctx: Context| {
            let seen = Arc::clone(&seen);
            async move {
                ctx.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let root = ctx("coop");
        let result = timeout(Duration::from_millis(20))(cooperative)(root.clone()).await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
        assert!(!root.is_cancelled(), "Only the attempt is cancelled");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_external_cancellation_is_not_a_timeout() {
        let root = ctx("cancelled");
        let trigger = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = timeout(Duration::from_secs(5))(sleeper(Duration::from_secs(5)))(root).await;
        assert!(matches!(result, Err(ActionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_panic_inside_task_is_converted() {
        let exploding = action(|_ctx| async {
            let items: Vec<u8> = Vec::new();
            #[allow(clippy::indexing_slicing)]
            let value: u8 = items[3];
            log::trace!("unreachable {}", value);
            Ok(())
        });
        let err = timeout(Duration::from_secs(1))(exploding)(ctx("index")).await.unwrap_err();
        match err {
            ActionError::Recovery(e) => {
                assert_eq!(e.command, "index");
                assert!(e.panic.contains("index out of bounds"));
                let stack = e.stack.unwrap_or_default();
                assert!(!stack.is_empty());
                assert!(stack.len() <= DEFAULT_STACK_SIZE);
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_graceful_timeout_lets_task_report() {
        let cooperative = action(|ctx: Context| async move {
            ctx.cancelled().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(ActionError::Other(anyhow::anyhow!("stopped cleanly")))
        });
        let err = graceful_timeout(Duration::from_millis(20), Duration::from_millis(200))(cooperative)(ctx("g"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "stopped cleanly");

        let stubborn = sleeper(Duration::from_secs(5));
        let err = graceful_timeout(Duration::from_millis(20), Duration::from_millis(20))(stubborn)(ctx("g"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Timeout(e) if e.duration == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_task_stopped_by_deadline_reports_timeout() {
        let obedient = action(|ctx: Context| async move {
            ctx.cancelled().await;
            Err(ActionError::Cancelled)
        });
        let err = graceful_timeout(Duration::from_millis(20), Duration::from_secs(1))(obedient)(ctx("stop"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Timeout(ref e) if e.command == "stop"), "{:?}", err);
    }

    #[tokio::test]
    async fn test_external_cancellation_during_grace_stays_cancelled() {
        let root = ctx("stop");
        let trigger = root.clone();
        let obedient = action(move |ctx: Context| {
            let trigger = trigger.clone();
            async move {
                ctx.cancelled().await;
                trigger.cancel();
                Err(ActionError::Cancelled)
            }
        });
        let err = graceful_timeout(Duration::from_millis(20), Duration::from_secs(1))(obedient)(root)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Cancelled), "{:?}", err);
    }

    #[tokio::test]
    async fn test_retry_runs_n_plus_one_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slow = action(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        });

        let result = timeout_with_retry(Duration::from_millis(15), 2)(slow)(ctx("flaky")).await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_other_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let failing = action(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ActionError::Cancelled) }
        });

        let result = timeout_with_retry(Duration::from_millis(50), 3)(failing)(ctx("x")).await;
        assert!(matches!(result, Err(ActionError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_command_timeout() {
        let mut durations = HashMap::new();
        durations.insert("quick".to_string(), Duration::from_millis(10));
        let layer = per_command_timeout(durations, Duration::from_secs(1));

        let quick = layer(sleeper(Duration::from_millis(100)))(ctx("quick")).await;
        assert!(matches!(quick, Err(ActionError::Timeout(e)) if e.duration == Duration::from_millis(10)));

        let other = layer(sleeper(Duration::from_millis(30)))(ctx("other")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_callback_is_invoked_before_returning() {
        let seen: Arc<Mutex<Vec<(String, Duration)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let callback: TimeoutCallback = Arc::new(move |command: &str, d: Duration| {
            sink.lock().push((command.to_string(), d));
        });

        let d = Duration::from_millis(10);
        let result = timeout_with_callback(d, callback)(sleeper(d * 5))(ctx("cb")).await;
        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec![("cb".to_string(), d)]);
    }

    #[tokio::test]
    async fn test_dynamic_zero_means_unbounded() {
        let layer = dynamic_timeout(|_ctx| Some(Duration::ZERO));
        let result = layer(sleeper(Duration::from_millis(30)))(ctx("free")).await;
        assert!(result.is_ok());

        let layer = dynamic_timeout(|ctx| ctx.local().duration("limit"));
        let bounded = Context::builder("cmd")
            .flag("limit", Duration::from_millis(5))
            .build();
        let result = layer(sleeper(Duration::from_millis(100)))(bounded).await;
        assert!(matches!(result, Err(ActionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_timeout_from_flag_checks_local_then_global() {
        let layer = timeout_from_flag("timeout", Duration::from_secs(5));

        let global_only = Context::builder("cmd")
            .global_flag("timeout", Duration::from_millis(10))
            .build();
        let result = layer(sleeper(Duration::from_millis(200)))(global_only).await;
        assert!(matches!(result, Err(ActionError::Timeout(e)) if e.duration == Duration::from_millis(10)));

        let local_wins = Context::builder("cmd")
            .flag("timeout", Duration::from_secs(2))
            .global_flag("timeout", Duration::from_millis(10))
            .build();
        let result = layer(sleeper(Duration::from_millis(30)))(local_wins).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let stats = Arc::new(TimeoutStats::new());
        let layer = timeout_with_stats(Duration::from_millis(10), Arc::clone(&stats));

        for name in ["a", "a", "b"] {
            let _ = layer(sleeper(Duration::from_millis(200)))(ctx(name)).await;
        }
        let _ = layer(sleeper(Duration::ZERO))(ctx("c")).await;

        assert_eq!(stats.total(), 3);
        assert_eq!(stats.for_command("a"), 2);
        assert_eq!(stats.for_command("b"), 1);
        assert_eq!(stats.for_command("c"), 0);
        assert!(stats.total_elapsed() >= Duration::from_millis(30));
        assert_eq!(stats.snapshot().len(), 2);
    }
}
