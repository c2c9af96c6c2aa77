use crate::env::Environment;
use crate::session::DEFAULT_HISTORY_SIZE;
use log::warn;
use std::path::PathBuf;

/// Interactive settings, read from environment variables at startup.
///
/// - `LITESHELL_HISTORY`: history file, `$HOME/.liteshell_history` by default; empty disables it.
/// - `LITESHELL_HISTORY_SIZE`: number of entries kept, 1000 by default.
/// - `LITESHELL_PROMPT`: text shown before the working directory, `liteshell` by default.
/// - `NO_COLOR`: any value turns off prompt colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub history_file: Option<PathBuf>,
    pub history_size: usize,
    pub prompt: String,
    pub color: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_file: None,
            history_size: DEFAULT_HISTORY_SIZE,
            prompt: "liteshell".to_string(),
            color: true,
        }
    }
}

impl Config {
    pub fn from_env(env: &Environment) -> Self {
        let defaults = Config::default();

        let history_file = match env.get_var("LITESHELL_HISTORY") {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => env
                .get_var("HOME")
                .map(|home| PathBuf::from(home).join(".liteshell_history")),
        };

        let history_size = match env.get_var("LITESHELL_HISTORY_SIZE") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    warn!(
                        "LITESHELL_HISTORY_SIZE={:?} is not a positive number, using {}",
                        raw, defaults.history_size
                    );
                    defaults.history_size
                }
            },
            None => defaults.history_size,
        };

        Self {
            history_file,
            history_size,
            prompt: env.get_var("LITESHELL_PROMPT").unwrap_or(defaults.prompt),
            color: env.get_var("NO_COLOR").is_none(),
        }
    }
}
