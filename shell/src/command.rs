use crate::exec::SpawnError;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Status reported for a command line that failed to parse.
pub const EXIT_USAGE: ExitCode = 2;
/// Status reported when a program exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: ExitCode = 126;
/// Status reported when a command cannot be found on the search path.
pub const EXIT_NOT_FOUND: ExitCode = 127;

/// Result of evaluating one command line.
#[derive(Debug)]
pub enum Outcome {
    /// A foreground command ran to completion with this status.
    Exited(ExitCode),
    /// A pipeline was started in the background; these are its process ids.
    Background(Vec<u32>),
    /// A stage could not be started, the rest of the line was abandoned.
    SpawnFailure(SpawnError),
    /// The `exit` builtin asked the interactive loop to stop.
    Quit,
}

impl Outcome {
    /// The shell-style status for this outcome.
    ///
    /// Background launches and `Quit` count as success.
    pub fn status(&self) -> ExitCode {
        match self {
            Outcome::Exited(code) => *code,
            Outcome::Background(_) | Outcome::Quit => 0,
            Outcome::SpawnFailure(err) => err.status(),
        }
    }
}
