// EN: src/lib.rs

pub use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod constants;
pub mod core;
pub mod system;

pub use crate::core::context::{CommandInfo, Context, ContextBuilder, FlagValue, Flags};
pub use crate::core::errors::{ActionError, ActionResult, RecoveryError, TimeoutError, ValidationError};
pub use crate::core::pipeline::{ActionFunc, ActionFuture, Chain, Middleware, Pipeline, action, middleware};
