// EN: src/core/context.rs

use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// --- Flag Values ---

/// A single parsed flag value, as handed over by the argument parser.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    String(String),
    Int(i64),
    Bool(bool),
    Duration(Duration),
    Float(f64),
    /// A string restricted to a fixed set of choices by the parser.
    Enum(String),
    Strings(Vec<String>),
}

impl FlagValue {
    /// Returns `true` when the value is the zero value of its type: an empty
    /// string or list, `0`, `0.0`, `false` or a zero duration.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::String(s) | Self::Enum(s) => s.is_empty(),
            Self::Int(i) => *i == 0,
            Self::Bool(b) => !*b,
            Self::Duration(d) => d.is_zero(),
            Self::Float(f) => *f == 0.0,
            Self::Strings(v) => v.is_empty(),
        }
    }

    /// Renders the value the way it would be typed on a command line.
    /// Lists produce one entry per element.
    pub fn to_arg_values(&self) -> Vec<String> {
        match self {
            Self::String(s) | Self::Enum(s) => vec![s.clone()],
            Self::Int(i) => vec![i.to_string()],
            Self::Bool(b) => vec![b.to_string()],
            Self::Duration(d) => vec![format!("{:?}", d)],
            Self::Float(f) => vec![f.to_string()],
            Self::Strings(v) => v.clone(),
        }
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Duration> for FlagValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<String>> for FlagValue {
    fn from(value: Vec<String>) -> Self {
        Self::Strings(value)
    }
}

#[derive(Debug, Clone)]
struct FlagEntry {
    value: FlagValue,
    /// `true` when the user supplied the flag, `false` for parser defaults.
    changed: bool,
}

/// The flags of one scope (command-local or global).
///
/// Typed accessors return `None` when the flag is unknown to this scope or
/// holds a value of another type.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    entries: HashMap<String, FlagEntry>,
}

impl Flags {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a flag the user supplied explicitly.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> &mut Self {
        self.entries.insert(
            name.into(),
            FlagEntry {
                value: value.into(),
                changed: true,
            },
        );
        self
    }

    /// Records a flag that only carries its declared default.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> &mut Self {
        self.entries.insert(
            name.into(),
            FlagEntry {
                value: value.into(),
                changed: false,
            },
        );
        self
    }

    /// Builder-style variant of [`Flags::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.entries.get(name).map(|e| &e.value)
    }

    /// Whether the user supplied the flag on the command line.
    pub fn changed(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.changed)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FlagValue::String(s) | FlagValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FlagValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn duration(&self, name: &str) -> Option<Duration> {
        match self.get(name)? {
            FlagValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            FlagValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Only answers for values set as [`FlagValue::Enum`].
    pub fn choice(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FlagValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str) -> Option<&[String]> {
        match self.get(name)? {
            FlagValue::Strings(v) => Some(v),
            _ => None,
        }
    }
}

// --- Command Identity ---

/// Name and description of the command being executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
}

// --- Context ---

type MetadataValue = Arc<dyn Any + Send + Sync>;

struct Shared {
    command: CommandInfo,
    local: Flags,
    global: Flags,
    args: Vec<String>,
    raw_args: Vec<String>,
    unknown_flags: Vec<String>,
    metadata: Mutex<HashMap<String, MetadataValue>>,
}

/// Everything a command action may consult during one invocation.
///
/// A `Context` is cheap to clone: clones share the parsed flags, arguments and
/// the metadata bag. Cancellation is a first-class field; [`Context::child`]
/// derives a context whose signal can be fired without affecting the parent.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Context {
    /// Starts building a context for the named command.
    pub fn builder(command: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(command)
    }

    pub fn command(&self) -> &CommandInfo {
        &self.shared.command
    }

    /// Flags declared on the current command.
    pub fn local(&self) -> &Flags {
        &self.shared.local
    }

    /// Flags inherited from the root command.
    pub fn global(&self) -> &Flags {
        &self.shared.global
    }

    /// Looks a flag up in the local scope first, then in the global one.
    pub fn lookup(&self, name: &str) -> Option<&FlagValue> {
        self.local().get(name).or_else(|| self.global().get(name))
    }

    /// Whether the user explicitly supplied the flag in either scope.
    pub fn is_set(&self, name: &str) -> bool {
        self.local().changed(name) || self.global().changed(name)
    }

    /// Positional arguments after flag processing.
    pub fn args(&self) -> &[String] {
        &self.shared.args
    }

    /// Arguments exactly as the user typed them.
    pub fn raw_args(&self) -> &[String] {
        &self.shared.raw_args
    }

    /// Flag tokens the parser did not recognise, in their original order.
    pub fn unknown_flags(&self) -> &[String] {
        &self.shared.unknown_flags
    }

    // --- Cancellation ---

    /// Fires the cancellation signal. Calling it again has no effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the cancellation signal has fired.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns a context sharing all state with `self` but carrying a child
    /// cancellation signal: it fires when the parent does, and cancelling it
    /// leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cancel: self.cancel.child_token(),
        }
    }

    // --- Metadata ---

    /// Stores a value in the metadata bag, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.shared.metadata.lock().insert(key.into(), Arc::new(value));
    }

    /// Returns a clone of the value stored under `key` if it has type `T`.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        let metadata = self.shared.metadata.lock();
        metadata.get(key)?.downcast_ref::<T>().cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.shared.metadata.lock().remove(key).is_some()
    }

    pub fn metadata_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.metadata.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Renders every metadata entry with a printable type (strings, integers,
    /// floats, booleans, durations, timestamps). Other values are skipped.
    pub fn metadata_strings(&self) -> BTreeMap<String, String> {
        let metadata = self.shared.metadata.lock();
        metadata
            .iter()
            .filter_map(|(key, value)| render_metadata(&**value).map(|v| (key.clone(), v)))
            .collect()
    }
}

fn render_metadata(value: &(dyn Any + Send + Sync)) -> Option<String> {
    if let Some(s) = value.downcast_ref::<String>() {
        return Some(s.clone());
    }
    if let Some(s) = value.downcast_ref::<&'static str>() {
        return Some((*s).to_string());
    }
    if let Some(i) = value.downcast_ref::<i64>() {
        return Some(i.to_string());
    }
    if let Some(i) = value.downcast_ref::<i32>() {
        return Some(i.to_string());
    }
    if let Some(u) = value.downcast_ref::<u64>() {
        return Some(u.to_string());
    }
    if let Some(f) = value.downcast_ref::<f64>() {
        return Some(f.to_string());
    }
    if let Some(b) = value.downcast_ref::<bool>() {
        return Some(b.to_string());
    }
    if let Some(d) = value.downcast_ref::<Duration>() {
        return Some(format!("{:?}", d));
    }
    value
        .downcast_ref::<chrono::DateTime<chrono::Utc>>()
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("command", &self.shared.command)
            .field("local", &self.shared.local)
            .field("global", &self.shared.global)
            .field("args", &self.shared.args)
            .field("raw_args", &self.shared.raw_args)
            .field("unknown_flags", &self.shared.unknown_flags)
            .field("metadata_keys", &self.metadata_keys())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// --- Builder ---

/// Assembles a [`Context`]. This is the hand-off point for the argument parser.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    command: CommandInfo,
    local: Flags,
    global: Flags,
    args: Vec<String>,
    raw_args: Option<Vec<String>>,
    unknown_flags: Vec<String>,
    cancel: Option<CancellationToken>,
}

impl ContextBuilder {
    fn new(command: impl Into<String>) -> Self {
        Self {
            command: CommandInfo {
                name: command.into(),
                description: String::new(),
            },
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.command.description = description.into();
        self
    }

    pub fn flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.local.set(name, value);
        self
    }

    pub fn default_flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.local.set_default(name, value);
        self
    }

    pub fn global_flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.global.set(name, value);
        self
    }

    pub fn local_flags(mut self, flags: Flags) -> Self {
        self.local = flags;
        self
    }

    pub fn global_flags(mut self, flags: Flags) -> Self {
        self.global = flags;
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments as typed. Defaults to a copy of [`ContextBuilder::args`].
    pub fn raw_args<I, S>(mut self, raw_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_args = Some(raw_args.into_iter().map(Into::into).collect());
        self
    }

    pub fn unknown_flags<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unknown_flags = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Uses an existing signal, e.g. one wired to Ctrl+C.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Context {
        let raw_args = self.raw_args.unwrap_or_else(|| self.args.clone());
        Context {
            shared: Arc::new(Shared {
                command: self.command,
                local: self.local,
                global: self.global,
                args: self.args,
                raw_args,
                unknown_flags: self.unknown_flags,
                metadata: Mutex::new(HashMap::new()),
            }),
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
        }
    }
}
