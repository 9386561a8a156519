// EN: src/system/mod.rs

//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying operating system.
//! It serves as a boundary between the pipeline core and the specifics of process
//! management.
//!
//! ## Modules
//!
//! - **`executor`**: Spawns and supervises external processes for wrapper commands. It
//!   handles cancellation (the child is killed when the invocation is cancelled),
//!   platform-specific command execution (e.g., `cmd.exe` on Windows), output capturing,
//!   and reports every outcome as a structured `ExecResult`.

pub mod executor;
