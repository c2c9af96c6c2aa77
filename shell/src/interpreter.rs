use crate::builtin::BuiltinRegistry;
use crate::command::{EXIT_USAGE, ExitCode, Outcome};
use crate::config::Config;
use crate::env::Environment;
use crate::exec::{self, open_output};
use crate::glob::expand_tokens;
use crate::lexer::tokenize;
use crate::parser::{self, Pipeline};
use crate::session::Session;
use anyhow::Context;
use log::{debug, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};
use std::os::fd::AsFd;

/// A small interactive shell: builtins run in-process, everything else through
/// [`exec::run`].
///
/// The interpreter owns the [`Session`] (environment, aliases, history) and the
/// [`BuiltinRegistry`] used to recognize in-process commands.
///
/// Example
/// ```
/// use liteshell::{Config, Interpreter, Outcome};
/// let mut sh = Interpreter::new(Config::default());
/// let mut out = Vec::new();
/// let outcome = sh.eval_with("pwd", &mut out);
/// assert_eq!(outcome.status(), 0);
/// assert!(matches!(sh.eval_with("exit", &mut out), Outcome::Quit));
/// ```
pub struct Interpreter {
    session: Session,
    builtins: BuiltinRegistry,
    config: Config,
    last_status: ExitCode,
}

impl Interpreter {
    /// Create an interpreter over the current process environment.
    pub fn new(config: Config) -> Self {
        Self::with_session(Session::new(Environment::new(), config.history_size), config)
    }

    /// Create an interpreter with configuration taken from the process environment.
    pub fn from_env() -> Self {
        let env = Environment::new();
        let config = Config::from_env(&env);
        Self::with_session(Session::new(env, config.history_size), config)
    }

    pub fn with_session(session: Session, config: Config) -> Self {
        Self {
            session,
            builtins: BuiltinRegistry::default(),
            config,
            last_status: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Status of the most recent command line run by [`Interpreter::repl`].
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    /// Evaluate one command line, writing shell output to standard output.
    pub fn eval(&mut self, line: &str) -> Outcome {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let outcome = self.eval_with(line, &mut lock);
        if let Err(err) = lock.flush() {
            warn!("flushing stdout: {}", err);
        }
        outcome
    }

    /// Evaluate one command line.
    ///
    /// Builtin output and background notices go to `out`; external commands write to
    /// the inherited standard output unless redirected. Diagnostics go to stderr.
    pub fn eval_with(&mut self, line: &str, out: &mut dyn Write) -> Outcome {
        let line = self.session.aliases.expand(line);
        let tokens = tokenize(&line);
        if tokens.is_empty() {
            return Outcome::Exited(0);
        }
        let tokens = expand_tokens(tokens, &self.session.env.current_dir);

        let pipeline = match parser::parse(tokens) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                eprintln!("liteshell: {}", err);
                return Outcome::Exited(EXIT_USAGE);
            }
        };

        if let [argv] = pipeline.stages.as_slice() {
            if self.builtins.contains(&argv[0]) {
                return self.run_builtin(argv, &pipeline, out);
            }
        }

        match exec::run(&pipeline, &self.session.env) {
            Outcome::Background(pids) => {
                for pid in &pids {
                    if let Err(err) = writeln!(out, "[{}]", pid) {
                        warn!("reporting background pid {}: {}", pid, err);
                    }
                }
                Outcome::Background(pids)
            }
            Outcome::SpawnFailure(err) => {
                eprintln!("liteshell: {}", err);
                Outcome::SpawnFailure(err)
            }
            outcome => outcome,
        }
    }

    fn run_builtin(&mut self, argv: &[String], pipeline: &Pipeline, out: &mut dyn Write) -> Outcome {
        let name = argv[0].as_str();
        if pipeline.background {
            debug!("{} is a builtin, running it in the foreground", name);
        }
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        let Some(builtin) = self.builtins.create(name, &args) else {
            return Outcome::Exited(1);
        };

        let result = match &pipeline.redirection.output {
            Some(path) => {
                let path = self.session.env.current_dir.join(path);
                open_output(&path, pipeline.redirection.append)
                    .with_context(|| path.display().to_string())
                    .and_then(|mut file| builtin.run(&mut file, &mut self.session))
            }
            None => builtin.run(out, &mut self.session),
        };

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                eprintln!("{}: {:#}", name, err);
                Outcome::Exited(1)
            }
        }
    }

    fn prompt(&self) -> String {
        let cwd = self.session.env.current_dir.display();
        if self.config.color {
            format!(
                "\x1b[1;32m{}\x1b[0m:\x1b[34m{}\x1b[0m \x1b[31m$\x1b[0m ",
                self.config.prompt, cwd
            )
        } else {
            format!("{}:{} $ ", self.config.prompt, cwd)
        }
    }

    /// Read-eval-print loop until `exit` or end of input.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        install_interrupt_handler()?;
        let terminal = TerminalMode::capture(io::stdin());

        let editor_config = rustyline::Config::builder()
            .max_history_size(self.config.history_size)?
            .auto_add_history(false)
            .build();
        let mut rl = DefaultEditor::with_config(editor_config)?;
        if let Some(path) = &self.config.history_file {
            if let Err(err) = rl.load_history(path) {
                debug!("no history loaded from {}: {}", path.display(), err);
            }
        }

        loop {
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line.as_str())?;
                    self.session.history.push(&line);

                    let outcome = self.eval(&line);
                    if let Some(terminal) = &terminal {
                        terminal.restore(io::stdin());
                    }
                    match outcome {
                        Outcome::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        outcome => self.last_status = outcome.status(),
                    }
                    debug!("status {}", self.last_status);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }

        if let Some(path) = &self.config.history_file {
            if let Err(err) = rl.save_history(path) {
                warn!("can't save history to {}: {}", path.display(), err);
            }
        }
        Ok(())
    }
}

/// Terminal settings saved at startup and put back after every command line, so a
/// program that exits with the terminal in raw or no-echo mode does not leak it.
struct TerminalMode {
    saved: Termios,
}

impl TerminalMode {
    /// `None` when `fd` is not a terminal.
    fn capture(fd: impl AsFd) -> Option<Self> {
        match termios::tcgetattr(fd) {
            Ok(saved) => Some(Self { saved }),
            Err(err) => {
                debug!("not saving terminal mode: {}", err);
                None
            }
        }
    }

    fn restore(&self, fd: impl AsFd) {
        if let Err(err) = termios::tcsetattr(fd, SetArg::TCSADRAIN, &self.saved) {
            warn!("resetting terminal mode: {}", err);
        }
    }
}

extern "C" fn on_interrupt(_: nix::libc::c_int) {}

/// Catches SIGINT with an empty handler so an interrupt during a foreground wait
/// only reaches the children. Caught signals are reset to default across exec.
fn install_interrupt_handler() -> anyhow::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler does nothing, so it is async-signal-safe.
    unsafe { signal::sigaction(Signal::SIGINT, &action) }.context("installing SIGINT handler")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn interpreter_in(dir: &TempDir) -> Interpreter {
        let mut env = Environment::new();
        env.current_dir = dir.path().to_path_buf();
        Interpreter::with_session(Session::new(env, 100), Config::default())
    }

    fn read(dir: &TempDir, name: &str) -> String {
        fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_empty_line_is_success() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert_eq!(sh.eval_with("   ", &mut out).status(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_error_is_reported_not_run() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert_eq!(sh.eval_with("echo hi >", &mut out).status(), EXIT_USAGE);
        assert_eq!(sh.eval_with("| |", &mut out).status(), EXIT_USAGE);
    }

    #[test]
    fn test_builtin_output_goes_to_writer_or_redirect() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert_eq!(sh.eval_with("pwd", &mut out).status(), 0);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{}\n", dir.path().display())
        );

        let mut out = Vec::new();
        assert_eq!(sh.eval_with("pwd > where.txt", &mut out).status(), 0);
        assert!(out.is_empty());
        assert_eq!(read(&dir, "where.txt"), format!("{}\n", dir.path().display()));
    }

    #[test]
    fn test_builtin_error_maps_to_status_one() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert_eq!(sh.eval_with("cd a b", &mut out).status(), 1);
        assert_eq!(sh.eval_with("history x", &mut out).status(), 1);
    }

    #[test]
    fn test_exit_is_distinct_from_exit_status() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert!(matches!(sh.eval_with("exit", &mut out), Outcome::Quit));
        assert!(matches!(
            sh.eval_with("sh -c 'exit 0'", &mut out),
            Outcome::Exited(0)
        ));
    }

    #[test]
    fn test_piped_builtin_name_is_not_a_builtin() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        // `exit` has no executable on PATH, so the pipeline cannot start.
        let outcome = sh.eval_with("exit | cat", &mut out);
        assert!(matches!(outcome, Outcome::SpawnFailure(_)));
        assert_eq!(outcome.status(), 127);
    }

    #[test]
    fn test_alias_is_substituted_before_tokenizing() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert_eq!(sh.eval_with("alias say='echo said'", &mut out).status(), 0);
        assert_eq!(sh.eval_with("say \"a  b\" > out.txt", &mut out).status(), 0);
        assert_eq!(read(&dir, "out.txt"), "said a  b\n");
    }

    #[test]
    fn test_quoted_operators_and_globs_reach_the_command() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();

        assert_eq!(
            sh.eval_with("echo *.txt '*.txt' \"|\" > out.txt", &mut out).status(),
            0
        );
        assert_eq!(read(&dir, "out.txt"), "a.txt b.txt *.txt |\n");
    }

    #[test]
    fn test_background_prints_pid() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        match sh.eval_with("sleep 0 &", &mut out) {
            Outcome::Background(pids) => {
                assert_eq!(String::from_utf8(out).unwrap(), format!("[{}]\n", pids[0]));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_unwritable_pid_notice_keeps_background_outcome() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        match sh.eval_with("sleep 0 &", &mut BrokenWriter) {
            Outcome::Background(pids) => assert_eq!(pids.len(), 1),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_exit_accepts_a_status_operand() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        let mut out = Vec::new();
        assert!(matches!(sh.eval_with("exit 0", &mut out), Outcome::Quit));
        assert!(matches!(sh.eval_with("exit 3", &mut out), Outcome::Quit));
    }

    #[test]
    fn test_terminal_mode_is_not_captured_from_a_file() {
        let file = tempfile::tempfile().unwrap();
        assert!(TerminalMode::capture(&file).is_none());
    }

    #[test]
    fn test_prompt_shows_directory() {
        let dir = TempDir::new().unwrap();
        let mut sh = interpreter_in(&dir);
        sh.config.color = false;
        assert_eq!(sh.prompt(), format!("liteshell:{} $ ", dir.path().display()));
    }
}
