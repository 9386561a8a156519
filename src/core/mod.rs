// EN: src/core/mod.rs

pub mod compiler;
pub mod context;
pub mod errors;
pub mod flag_groups;
pub mod logger;
pub mod pipeline;
pub mod pool;
pub mod recovery;
pub mod timeout;
pub mod validator;
pub mod wrapper;
