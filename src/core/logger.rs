// EN: src/core/logger.rs

//! Request logging middleware.
//!
//! Each invocation produces one record after the action returns, plus a
//! start record at `Debug` level. Records borrow their storage from the
//! [`RecordPool`] owned by the config.

use crate::constants::START_TIME_KEY;
use crate::core::context::Context;
use crate::core::errors::{ActionError, ActionResult};
use crate::core::pipeline::{ActionFunc, Middleware, middleware};
use crate::core::pool::{RecordPool, RequestInfo};
use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

// --- Options ---

/// Verbosity threshold. Variants are ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    /// Whether a record of `severity` passes this threshold.
    pub fn allows(self, severity: Self) -> bool {
        self != Self::None && severity != Self::None && severity <= self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("Unknown log level '{}'.", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown log format '{}'.", other)),
        }
    }
}

/// Standard destinations. A custom writer set with [`LoggerConfig::writer`]
/// takes precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum LogOutput {
    Stdout,
    Stderr,
    None,
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            "none" => Ok(Self::None),
            other => Err(format!("Unknown log output '{}'.", other)),
        }
    }
}

pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// An in-memory writer whose contents stay readable after it is handed to a
/// [`LoggerConfig`].
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for BufferSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// --- Configuration ---

#[derive(Clone)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Adds the positional args to each record.
    pub include_args: bool,
    writer: Option<SharedWriter>,
    pool: Arc<RecordPool>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Stderr,
            format: LogFormat::Text,
            include_args: false,
            writer: None,
            pool: Arc::new(RecordPool::default()),
        }
    }
}

impl fmt::Debug for LoggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerConfig")
            .field("level", &self.level)
            .field("output", &self.output)
            .field("format", &self.format)
            .field("include_args", &self.include_args)
            .field("custom_writer", &self.writer.is_some())
            .field("pool", &self.pool)
            .finish()
    }
}

impl LoggerConfig {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn include_args(mut self, include: bool) -> Self {
        self.include_args = include;
        self
    }

    /// Sends records to `writer` instead of the standard output streams.
    pub fn writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Some(Arc::new(Mutex::new(Box::new(writer))));
        self
    }

    pub fn with_pool(mut self, pool: Arc<RecordPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn record_pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }

    /// Write failures are ignored: logging never fails a command.
    fn emit(&self, line: &str) {
        if let Some(writer) = &self.writer {
            let mut writer = writer.lock();
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
            return;
        }
        match self.output {
            LogOutput::Stdout => {
                let _ = writeln!(io::stdout().lock(), "{}", line);
            }
            LogOutput::Stderr => {
                let _ = writeln!(io::stderr().lock(), "{}", line);
            }
            LogOutput::None => {}
        }
    }
}

// --- Rendering ---

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: &'a str,
    level: &'static str,
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'static str>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a BTreeMap<String, String>>,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Renders `record` into its scratch line.
fn render(record: &mut RequestInfo, level: LogLevel, format: LogFormat, include_args: bool, started: bool) {
    let RequestInfo {
        command,
        args,
        duration,
        error,
        metadata,
        line,
        ..
    } = record;
    line.clear();
    let ts = timestamp();
    let args = (include_args && !args.is_empty()).then_some(args.as_slice());

    match format {
        LogFormat::Text => {
            let _ = write!(line, "[{}] {} command={}", ts, level.label(), command);
            if started {
                line.push_str(" started");
            } else {
                let _ = write!(line, " duration={:?}", duration);
            }
            if let Some(args) = args {
                let _ = write!(line, " args={}", args.join(" "));
            }
            if let Some(error) = error {
                let _ = write!(line, " error=\"{}\"", error.replace('"', "\\\""));
            }
        }
        LogFormat::Json => {
            let json = JsonRecord {
                timestamp: &ts,
                level: level.label(),
                command: command.as_str(),
                event: started.then_some("start"),
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                args,
                error: error.as_deref(),
                metadata: (!started && !metadata.is_empty()).then_some(&*metadata),
            };
            if let Ok(rendered) = serde_json::to_string(&json) {
                line.push_str(&rendered);
            }
        }
    }
}

fn severity(result: &ActionResult) -> LogLevel {
    match result {
        Ok(()) => LogLevel::Info,
        Err(ActionError::Timeout(_) | ActionError::Cancelled) => LogLevel::Warn,
        Err(_) => LogLevel::Error,
    }
}

// --- Middleware ---

/// Records every invocation passing through it.
///
/// The start time is published in the metadata bag under [`START_TIME_KEY`].
/// The record is returned to the pool on every exit path, unwinding included.
pub fn logger(config: LoggerConfig) -> Middleware {
    let config = Arc::new(config);
    middleware(move |next: ActionFunc| {
        let config = Arc::clone(&config);
        Arc::new(move |ctx: Context| {
            let config = Arc::clone(&config);
            let next = Arc::clone(&next);
            async move {
                let pool = Arc::clone(&config.pool);
                let mut record = scopeguard::guard(pool.acquire(), move |r| pool.release(r));

                let started_at = Utc::now();
                let clock = Instant::now();
                ctx.set(START_TIME_KEY, started_at);
                record.command.push_str(&ctx.command().name);
                record.args.extend(ctx.args().iter().cloned());
                record.start = Some(started_at);

                if config.level.allows(LogLevel::Debug) {
                    render(&mut record, LogLevel::Debug, config.format, config.include_args, true);
                    config.emit(&record.line);
                }

                let result = next(ctx.clone()).await;

                let level = severity(&result);
                if config.level.allows(level) {
                    record.duration = clock.elapsed();
                    record.error = result.as_ref().err().map(ToString::to_string);
                    record.metadata = ctx.metadata_strings();
                    render(&mut record, level, config.format, config.include_args, false);
                    config.emit(&record.line);
                }
                result
            }
            .boxed()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::{Chain, action};
    use crate::core::recovery::recovery;
    use crate::core::timeout::timeout;
    use std::time::Duration;

    fn captured(level: LogLevel, format: LogFormat) -> (LoggerConfig, BufferSink) {
        let sink = BufferSink::new();
        let config = LoggerConfig::default()
            .level(level)
            .format(format)
            .writer(sink.clone());
        (config, sink)
    }

    fn unwinding_action() -> ActionResult {
        panic!("unwinding through the logger");
    }

    #[tokio::test]
    async fn test_successful_wrapped_action_logs_one_record() {
        let (config, sink) = captured(LogLevel::Info, LogFormat::Text);
        let chain = Chain::new([
            logger(config.include_args(true)),
            recovery(),
            timeout(Duration::from_secs(1)),
        ]);
        let ctx = Context::builder("build").args(["src", "docs"]).build();

        chain.apply(action(|_ctx| async { Ok(()) }))(ctx.clone())
            .await
            .unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 1, "{:?}", lines);
        assert!(lines[0].contains(" INFO command=build duration="));
        assert!(lines[0].ends_with(" args=src docs"));
        assert!(ctx.get::<chrono::DateTime<Utc>>(START_TIME_KEY).is_some());
    }

    #[tokio::test]
    async fn test_debug_level_adds_start_record() {
        let (config, sink) = captured(LogLevel::Debug, LogFormat::Text);
        logger(config)(action(|_ctx| async { Ok(()) }))(Context::builder("sync").build())
            .await
            .unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("DEBUG command=sync started"));
        assert!(lines[1].contains("INFO command=sync"));
    }

    #[tokio::test]
    async fn test_severity_follows_outcome() {
        let (config, sink) = captured(LogLevel::Warn, LogFormat::Text);
        let layer = logger(config);

        layer(action(|_ctx| async { Ok(()) }))(Context::builder("ok").build())
            .await
            .unwrap();
        let _ = layer(action(|_ctx| async { Err(ActionError::Cancelled) }))(Context::builder("stop").build()).await;
        let _ = layer(action(|_ctx| async { Err(anyhow::anyhow!("said \"no\"").into()) }))(
            Context::builder("fail").build(),
        )
        .await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 2, "{:?}", lines);
        assert!(lines[0].contains("WARN command=stop"));
        assert!(lines[0].ends_with("error=\"Operation was cancelled.\""));
        assert!(lines[1].contains("ERROR command=fail"));
        assert!(lines[1].ends_with(r#"error="said \"no\"""#));
    }

    #[tokio::test]
    async fn test_json_records_escape_and_carry_metadata() {
        let (config, sink) = captured(LogLevel::Info, LogFormat::Json);
        let failing = action(|ctx: Context| async move {
            ctx.set("user", "ana".to_string());
            Err(anyhow::anyhow!("bad \"quote\"\nnext line").into())
        });

        let result = logger(config.include_args(true))(failing)(Context::builder("push").args(["origin"]).build()).await;
        assert!(result.is_err());

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["level"], "ERROR");
        assert_eq!(value["command"], "push");
        assert_eq!(value["error"], "bad \"quote\"\nnext line");
        assert_eq!(value["args"][0], "origin");
        assert_eq!(value["metadata"]["user"], "ana");
        assert!(value["metadata"][START_TIME_KEY].is_string());
        assert!(value["duration_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_level_none_is_silent() {
        let (config, sink) = captured(LogLevel::None, LogFormat::Text);
        let _ = logger(config)(action(|_ctx| async { Err(ActionError::Cancelled) }))(Context::builder("x").build()).await;
        assert!(sink.contents().is_empty());
    }

    #[tokio::test]
    async fn test_record_returns_to_pool_even_when_unwinding() {
        let pool = Arc::new(RecordPool::new(4));
        let (config, _sink) = captured(LogLevel::Info, LogFormat::Text);
        let layer = logger(config.with_pool(Arc::clone(&pool)));

        layer(action(|_ctx| async { Ok(()) }))(Context::builder("a").build())
            .await
            .unwrap();
        assert_eq!(pool.idle(), 1);

        let exploding = action(|_ctx| async { unwinding_action() });
        let outcome = std::panic::AssertUnwindSafe(layer(exploding)(Context::builder("b").build()))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());
        assert_eq!(pool.idle(), 1);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("none".parse::<LogOutput>(), Ok(LogOutput::None));
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Info.allows(LogLevel::Error));
        assert!(!LogLevel::Info.allows(LogLevel::Debug));
    }
}
