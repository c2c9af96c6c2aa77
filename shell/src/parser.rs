use crate::lexer::Token;
use log::{debug, warn};
use std::path::PathBuf;
use thiserror::Error;

/// Where the pipeline's first stage reads from and its last stage writes to.
///
/// Redirection is parsed once per command line, not per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirection {
    /// Replaces standard input of the first stage (`< path`).
    pub input: Option<PathBuf>,
    /// Replaces standard output of the last stage (`> path` or `>> path`).
    pub output: Option<PathBuf>,
    /// Set for `>>`: append to `output` instead of truncating it.
    pub append: bool,
}

/// A fully parsed command line, ready for dispatch.
///
/// Every stage holds at least one word; `stages` itself is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Argument vectors in execution order, `argv[0]` being the command name.
    pub stages: Vec<Vec<String>>,
    pub redirection: Redirection,
    /// Set by a trailing `&`: do not wait for completion.
    pub background: bool,
}

/// Errors that abandon a command line before anything is executed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A redirection operator was the last word or was followed by another operator.
    #[error("syntax error: expected a file name after `{0}`")]
    MissingRedirectTarget(String),
    /// Nothing was left to run once operators were removed.
    #[error("syntax error: empty command")]
    EmptyCommand,
}

const OPERATORS: [&str; 5] = ["|", "<", ">", ">>", "&"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectKind {
    Input,
    Output,
    Append,
}

impl RedirectKind {
    fn from_token(token: &Token) -> Option<Self> {
        if token.is_operator("<") {
            Some(RedirectKind::Input)
        } else if token.is_operator(">") {
            Some(RedirectKind::Output)
        } else if token.is_operator(">>") {
            Some(RedirectKind::Append)
        } else {
            None
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            RedirectKind::Input => "<",
            RedirectKind::Output => ">",
            RedirectKind::Append => ">>",
        }
    }
}

struct CommandLineParser {
    tokens: Vec<Token>,
}

impl CommandLineParser {
    fn from(tokens: Vec<Token>) -> Self {
        CommandLineParser { tokens }
    }

    fn build(mut self) -> Result<Pipeline, ParseError> {
        let background = self.strip_background();
        let redirection = self.extract_redirections()?;
        let stages = self.split_stages();

        if stages.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        let pipeline = Pipeline {
            stages,
            redirection,
            background,
        };
        debug!("parsed {:?}", pipeline);
        Ok(pipeline)
    }

    /// Removes a trailing lone `&`.
    fn strip_background(&mut self) -> bool {
        match self.tokens.last() {
            Some(token) if token.is_operator("&") => {
                self.tokens.pop();
                true
            }
            _ => false,
        }
    }

    /// Removes every redirection operator together with its file name.
    ///
    /// The first occurrence of each direction wins; later ones are dropped with a warning.
    /// `>` and `>>` share the output direction.
    fn extract_redirections(&mut self) -> Result<Redirection, ParseError> {
        let mut redirection = Redirection::default();
        let mut remaining = Vec::with_capacity(self.tokens.len());
        let mut tokens = std::mem::take(&mut self.tokens).into_iter().peekable();

        while let Some(token) = tokens.next() {
            let Some(kind) = RedirectKind::from_token(&token) else {
                remaining.push(token);
                continue;
            };

            let target = match tokens.next_if(|next| !is_operator(next)) {
                Some(next) => PathBuf::from(next.text),
                None => return Err(ParseError::MissingRedirectTarget(kind.symbol().into())),
            };

            match kind {
                RedirectKind::Input if redirection.input.is_none() => {
                    redirection.input = Some(target);
                }
                RedirectKind::Output | RedirectKind::Append if redirection.output.is_none() => {
                    redirection.append = kind == RedirectKind::Append;
                    redirection.output = Some(target);
                }
                _ => warn!(
                    "ignoring duplicate redirection {} {}",
                    kind.symbol(),
                    target.display()
                ),
            }
        }

        self.tokens = remaining;
        Ok(redirection)
    }

    /// Splits on `|`, dropping stages left empty by boundary or doubled pipes.
    fn split_stages(self) -> Vec<Vec<String>> {
        let mut stages = Vec::new();
        let mut current = Vec::new();
        for token in self.tokens {
            if token.is_operator("|") {
                if !current.is_empty() {
                    stages.push(std::mem::take(&mut current));
                }
            } else {
                current.push(token.text);
            }
        }
        if !current.is_empty() {
            stages.push(current);
        }
        stages
    }
}

fn is_operator(token: &Token) -> bool {
    OPERATORS.iter().any(|op| token.is_operator(op))
}

/// Turns an expanded token sequence into a [`Pipeline`].
///
/// Order of the steps: trailing `&`, then redirections, then pipe splitting.
pub fn parse(tokens: Vec<Token>) -> Result<Pipeline, ParseError> {
    CommandLineParser::from(tokens).build()
}
