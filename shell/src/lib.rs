//! A small interactive shell.
//!
//! A command line goes through a fixed chain of stages:
//! alias substitution → [`lexer::tokenize`] → [`glob::expand_tokens`] →
//! [`parser::parse`] → builtin dispatch or [`exec::run`].
//!
//! The main entry point is [`Interpreter`], which owns the per-session state
//! ([`Session`]) and evaluates lines one at a time, either through its
//! read-eval-print loop or programmatically with [`Interpreter::eval_with`].

mod builtin;
pub mod command;
mod config;
pub mod env;
pub mod exec;
mod external;
pub mod glob;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod session;

pub use builtin::{Builtin, BuiltinRegistry};
pub use command::{ExitCode, Outcome};
pub use config::Config;
pub use interpreter::Interpreter;
pub use session::Session;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    /// Serializes tests that change the process working directory.
    pub fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
