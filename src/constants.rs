// EN: src/constants.rs

use std::time::Duration;

/// Placeholder replaced by the absolute path of the running executable when it
/// appears inside a wrapper's injected arguments.
pub const SELF_TOKEN: &str = "@self";

/// Metadata key under which the logger publishes the invocation start time
/// (`chrono::DateTime<Utc>`).
pub const START_TIME_KEY: &str = "start_time";

/// Metadata key for the panic message published by the safe recovery variant.
pub const PANIC_VALUE_KEY: &str = "panic.value";

/// Metadata key for the stack trace published by the safe recovery variant.
pub const PANIC_STACK_KEY: &str = "panic.stack";

/// Metadata key under which a wrapped command publishes the child's exit code (`i64`).
pub const EXIT_CODE_KEY: &str = "exec.exit_code";

/// Upper bound, in bytes, of a captured panic stack trace.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024;

/// Bound applied by `TimeoutConfig::default()`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of idle log records a `RecordPool` keeps around for reuse.
pub const RECORD_POOL_CAPACITY: usize = 32;
