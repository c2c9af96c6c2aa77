//! Lexical analysis (tokenization) of a single command line.
//!
//! Quoting policy, applied uniformly:
//! - Outside quotes a backslash makes the next character literal (the backslash is consumed).
//! - Inside single quotes every character is literal, including backslash; only `'` ends the quote.
//! - Inside double quotes a backslash makes the next character literal; `"` ends the quote.
//! - A quote character opens a quote only when not already inside the other kind.
//! - Quote characters are consumed and never appear in the token text.
//! - Unquoted whitespace separates tokens; quoted whitespace is kept.
//! - An unterminated quote is closed silently at end of line.
//! - A backslash as the very last character is kept as a literal backslash.
//! - Empty tokens are never produced, so `""` on its own yields nothing.

use log::trace;

/// A word produced by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The text of the word with quotes and escapes already resolved.
    pub text: String,
    /// Set when quoting, escaping or wildcard expansion contributed to the word.
    ///
    /// Literal tokens are never interpreted as operators and never glob-expanded.
    pub literal: bool,
}

impl Token {
    /// A word that came from plain, unquoted input.
    pub fn word(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            literal: false,
        }
    }

    /// A word whose text must be taken verbatim.
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            literal: true,
        }
    }

    /// True if this token is the unquoted operator `op`.
    pub fn is_operator(&self, op: &str) -> bool {
        !self.literal && self.text == op
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Unquoted,
    SingleQuote,
    DoubleQuote,
}

struct LexingFSM {
    state: LexingState,
    escape_next: bool,
    buffer: String,
    literal: bool,
    out: Vec<Token>,
}

impl LexingFSM {
    fn new() -> Self {
        LexingFSM {
            state: LexingState::Unquoted,
            escape_next: false,
            buffer: String::new(),
            literal: false,
            out: Vec::new(),
        }
    }

    fn feed(&mut self, ch: char) {
        if self.escape_next {
            self.escape_next = false;
            self.literal = true;
            self.buffer.push(ch);
            return;
        }

        match self.state {
            LexingState::Unquoted => self.handle_unquoted(ch),
            LexingState::SingleQuote => self.handle_single_quote(ch),
            LexingState::DoubleQuote => self.handle_double_quote(ch),
        }
    }

    fn handle_unquoted(&mut self, ch: char) {
        match ch {
            '\\' => self.escape_next = true,
            '\'' => {
                self.literal = true;
                self.state = LexingState::SingleQuote;
            }
            '"' => {
                self.literal = true;
                self.state = LexingState::DoubleQuote;
            }
            c if c.is_whitespace() => self.flush(),
            c => self.buffer.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::Unquoted,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '\\' => self.escape_next = true,
            '"' => self.state = LexingState::Unquoted,
            c => self.buffer.push(c),
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.out.push(Token {
                text: std::mem::take(&mut self.buffer),
                literal: self.literal,
            });
        }
        self.literal = false;
    }

    fn finish(mut self) -> Vec<Token> {
        if self.escape_next {
            self.buffer.push('\\');
        }
        if self.state != LexingState::Unquoted {
            trace!("closing unterminated quote at end of line");
        }
        self.flush();
        self.out
    }
}

/// Splits a raw input line into tokens, honoring quotes and backslash escapes.
///
/// Never fails: malformed quoting is resolved as described in the module docs.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut fsm = LexingFSM::new();
    for ch in line.chars() {
        fsm.feed(ch);
    }
    let tokens = fsm.finish();
    trace!("tokens: {:?}", tokens);
    tokens
}
