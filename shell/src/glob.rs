//! Wildcard expansion of `*` patterns against a directory listing.
//!
//! The matcher is deliberately simple and does not backtrack. The text before the
//! first `*` must be a prefix of the name. For every following piece, matching skips
//! ahead to the first occurrence of the piece's leading character and then requires
//! the piece to match exactly there; the last piece must also end the name.
//! A pattern with a single `*` therefore behaves as expected, while a name such as
//! `a.b.txt` is not matched by `a*.txt` (the skip stops at the first `.`).

use crate::lexer::Token;
use log::debug;
use std::fs;
use std::path::Path;

/// Expands one token containing `*` into the sorted list of matching paths.
///
/// Relative directory parts are resolved against `cwd`, but the returned strings keep
/// the directory part as written (bare names when the pattern had no `/`). When the
/// directory cannot be read or nothing matches, the token itself is returned unchanged.
pub fn expand(token: &str, cwd: &Path) -> Vec<String> {
    if !token.contains('*') {
        return vec![token.to_string()];
    }

    let (dir, pattern) = match token.rsplit_once('/') {
        Some(("", pattern)) => (Some("/"), pattern),
        Some((dir, pattern)) => (Some(dir), pattern),
        None => (None, token),
    };

    let listing = cwd.join(dir.unwrap_or("."));
    let entries = match fs::read_dir(&listing) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("glob: can't read {}: {}", listing.display(), err);
            return vec![token.to_string()];
        }
    };

    let show_hidden = pattern.starts_with('.');
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| show_hidden || !name.starts_with('.'))
        .filter(|name| matches(pattern, name))
        .collect();
    names.sort();

    if names.is_empty() {
        return vec![token.to_string()];
    }

    names
        .into_iter()
        .map(|name| match dir {
            None | Some(".") => name,
            Some("/") => format!("/{}", name),
            Some(dir) => format!("{}/{}", dir, name),
        })
        .collect()
}

/// Expands every unquoted wildcard token, keeping the order of the input.
///
/// Produced file names are marked literal so they are not re-read as operators.
pub fn expand_tokens(tokens: Vec<Token>, cwd: &Path) -> Vec<Token> {
    let mut result = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.literal || !token.text.contains('*') {
            result.push(token);
            continue;
        }
        let expanded = expand(&token.text, cwd);
        if expanded.len() == 1 && expanded[0] == token.text {
            result.push(token);
        } else {
            result.extend(expanded.into_iter().map(Token::literal));
        }
    }
    result
}

/// Matches `name` against `pattern` using the non-backtracking rules above.
pub fn matches(pattern: &str, name: &str) -> bool {
    let mut pieces = pattern.split('*');
    let head = pieces.next().unwrap_or("");
    let Some(mut rest) = name.strip_prefix(head) else {
        return false;
    };

    let mut pieces = pieces.peekable();
    if pieces.peek().is_none() {
        // No wildcard at all.
        return rest.is_empty();
    }

    while let Some(piece) = pieces.next() {
        let last = pieces.peek().is_none();
        let Some(lead) = piece.chars().next() else {
            if last {
                return true;
            }
            continue;
        };
        let Some(at) = rest.find(lead) else {
            return false;
        };
        let candidate = &rest[at..];
        if last {
            return candidate == piece;
        }
        match candidate.strip_prefix(piece) {
            Some(after) => rest = after,
            None => return false,
        }
    }
    true
}
