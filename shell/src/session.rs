//! Per-interpreter state that outlives a single command line.

use crate::env::Environment;
use anyhow::{Result, bail};
use regex::Regex;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Everything builtins may read or change, passed around by `&mut`.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub env: Environment,
    pub aliases: AliasTable,
    pub history: History,
}

impl Session {
    pub fn new(env: Environment, history_size: usize) -> Self {
        Self {
            env,
            aliases: AliasTable::default(),
            history: History::with_capacity(history_size),
        }
    }
}

fn alias_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid alias name regex"))
}

/// Name to replacement text, kept sorted for listing.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Defines or replaces an alias. Names may use letters, digits, `_`, `.` and `-`.
    pub fn define(&mut self, name: &str, value: &str) -> Result<()> {
        if !alias_name_pattern().is_match(name) {
            bail!("`{}': invalid alias name", name);
        }
        self.entries.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replaces the first word of `line` with its alias, once and non-recursively.
    pub fn expand(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        let end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let (first, rest) = trimmed.split_at(end);
        match self.lookup(first) {
            Some(replacement) => format!("{}{}", replacement, rest),
            None => line.to_string(),
        }
    }
}

/// Append-only log of input lines, bounded to the most recent `capacity` entries.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
}

/// Used when no explicit size is configured.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last `count` entries with their 1-based position in the log.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = (usize, &str)> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, line)| (i + 1, line.as_str()))
    }
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }
}
