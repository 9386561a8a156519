// EN: src/cli/exit_codes.rs

use crate::core::errors::{ActionError, ActionResult};
use crate::core::wrapper::WrapperError;
use crate::system::executor::ExecError;

/// Process exit codes used by the `cmdflow` binary.
#[derive(Debug, Clone, Copy)]
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    /// Invalid flags or arguments.
    pub const USAGE: i32 = 2;
    pub const RECOVERED_PANIC: i32 = 70;
    /// Same as coreutils `timeout`.
    pub const TIMEOUT: i32 = 124;
    pub const NOT_FOUND: i32 = 127;
    /// Standard shell exit code for SIGINT.
    pub const CANCELLED: i32 = 130;

    pub fn for_error(error: &ActionError) -> i32 {
        match error {
            ActionError::Validation(_) | ActionError::FlagGroup(_) => Self::USAGE,
            ActionError::Timeout(_) => Self::TIMEOUT,
            ActionError::Recovery(_) => Self::RECOVERED_PANIC,
            ActionError::Cancelled => Self::CANCELLED,
            ActionError::Wrapper(wrapper) => match wrapper {
                WrapperError::MissingTarget => Self::USAGE,
                WrapperError::NonZeroExit { code, .. } => *code,
                WrapperError::Exec(ExecError::Spawn { .. }) => Self::NOT_FOUND,
                WrapperError::Exec(ExecError::Cancelled { .. }) => Self::CANCELLED,
                WrapperError::SelfPath(_) | WrapperError::Exec(_) => Self::FAILURE,
            },
            ActionError::Other(_) => Self::FAILURE,
        }
    }

    pub fn for_result(result: &ActionResult) -> i32 {
        match result {
            Ok(()) => Self::SUCCESS,
            Err(e) => Self::for_error(e),
        }
    }
}
