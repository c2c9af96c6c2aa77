use crate::command::Outcome;
use crate::session::Session;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "exit".
    fn name() -> &'static str;

    /// Executes the command, writing any output to `stdout`.
    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome>;
}

/// Object-safe form of a parsed builtin, ready to run.
pub trait Builtin {
    fn run(self: Box<Self>, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome>;
}

impl<T: BuiltinCommand> Builtin for T {
    fn run(self: Box<Self>, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome> {
        T::execute(*self, stdout, session)
    }
}

/// Result of asking argh to parse a builtin's arguments when it declined to.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl Builtin for InvalidArgs {
    fn run(self: Box<Self>, stdout: &mut dyn Write, _session: &mut Session) -> Result<Outcome> {
        if self.is_error {
            return Err(anyhow!(self.output.trim_end().to_string()));
        }
        writeln!(stdout, "{}", self.output.trim_end())?;
        Ok(Outcome::Exited(0))
    }
}

/// Creates a builtin instance from its arguments.
pub trait BuiltinFactory {
    fn create(&self, name: &str, args: &[&str]) -> Box<dyn Builtin>;
}

/// Factory for one [`BuiltinCommand`] type.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> BuiltinFactory for Factory<T> {
    fn create(&self, name: &str, args: &[&str]) -> Box<dyn Builtin> {
        match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        }
    }
}

/// Name to factory map of every command that runs inside the shell process.
pub struct BuiltinRegistry {
    factories: BTreeMap<&'static str, Box<dyn BuiltinFactory>>,
}

impl BuiltinRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub(crate) fn register<T: BuiltinCommand + 'static>(&mut self) {
        self.factories
            .insert(T::name(), Box::new(Factory::<T>::default()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Parses `args` for the builtin called `name`, if there is one.
    pub fn create(&self, name: &str, args: &[&str]) -> Option<Box<dyn Builtin>> {
        self.factories
            .get(name)
            .map(|factory| factory.create(name, args))
    }
}

impl Default for BuiltinRegistry {
    /// `cd`, `exit`, `help`, `pwd`, `history`, `alias` and `unalias`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register::<Cd>();
        registry.register::<Exit>();
        registry.register::<Help>();
        registry.register::<Pwd>();
        registry.register::<HistoryCmd>();
        registry.register::<Alias>();
        registry.register::<Unalias>();
        registry
    }
}

/// Change the current working directory.
///
/// Parsed by hand rather than derived: `-` is a directory operand, not a flag.
pub struct Cd {
    /// `None` for the home directory, `Some("-")` for the previous directory.
    pub target: Option<String>,
}

const CD_USAGE: &str = "Usage: cd [dir | -]\n\n\
Change the current directory to dir, to $HOME when omitted,\n\
or to the previous directory ($OLDPWD) when dir is -.";

impl FromArgs for Cd {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        match args {
            [] => Ok(Cd { target: None }),
            ["--help"] => Err(EarlyExit {
                output: CD_USAGE.to_string(),
                status: Ok(()),
            }),
            [target] => Ok(Cd {
                target: Some(target.to_string()),
            }),
            _ => Err(EarlyExit {
                output: "too many arguments".to_string(),
                status: Err(()),
            }),
        }
    }
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome> {
        let env = &mut session.env;
        let (target, remember) = match self.target.as_deref() {
            None => {
                let home = env.get_var("HOME").context("HOME not set")?;
                (PathBuf::from(home), true)
            }
            Some("") => bail!("empty directory name"),
            Some("-") => {
                let previous = env.get_var("OLDPWD").context("OLDPWD not set")?;
                (PathBuf::from(previous), false)
            }
            Some(t) => (PathBuf::from(t), true),
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            env.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("{}: no such directory", new_dir.display()))?;
        if !canonical.is_dir() {
            bail!("{}: not a directory", new_dir.display());
        }

        env::set_current_dir(&canonical)
            .with_context(|| format!("can't chdir to {}", canonical.display()))?;
        let previous = std::mem::replace(&mut env.current_dir, canonical);
        if remember {
            env.set_var("OLDPWD", previous.to_string_lossy());
        } else {
            writeln!(stdout, "{}", env.current_dir.display())?;
        }
        let pwd = env.current_dir.to_string_lossy().into_owned();
        env.set_var("PWD", pwd);
        Ok(Outcome::Exited(0))
    }
}

#[derive(FromArgs)]
/// Leave the shell.
pub struct Exit {
    #[argh(positional)]
    /// accepted for compatibility; the shell always leaves with status 0.
    pub status: Option<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, _session: &mut Session) -> Result<Outcome> {
        Ok(Outcome::Quit)
    }
}

#[derive(FromArgs)]
/// Show the list of built-in commands.
pub struct Help {}

const HELP_TEXT: &str = "\
liteshell: a small interactive shell
Built-in commands:
  cd [dir | -]         change directory ($HOME when omitted, previous with -)
  pwd                  print the current directory
  history [count]      list the last count input lines (all when omitted)
  alias [name[=value]] define or show aliases
  unalias name         remove an alias
  help                 show this help message
  exit [status]        leave the shell
Syntax:
  cmd1 | cmd2          connect stdout of cmd1 to stdin of cmd2
  < file, > file       redirect stdin / stdout, >> file appends
  cmd &                run in the background
  \"..\", '..', \\x      quote and escape
  *                    expand file names
Other commands are executed as external programs.";

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(self, stdout: &mut dyn Write, _session: &mut Session) -> Result<Outcome> {
        writeln!(stdout, "{}", HELP_TEXT)?;
        Ok(Outcome::Exited(0))
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome> {
        writeln!(stdout, "{}", session.env.current_dir.to_string_lossy())?;
        Ok(Outcome::Exited(0))
    }
}

#[derive(FromArgs)]
/// List previously entered command lines, oldest first.
pub struct HistoryCmd {
    #[argh(positional)]
    /// number of most recent lines to show.
    pub count: Option<usize>,
}

impl BuiltinCommand for HistoryCmd {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome> {
        let count = match self.count {
            Some(0) => bail!("count must be a positive number"),
            Some(count) => count,
            None => session.history.len(),
        };
        for (number, line) in session.history.tail(count) {
            writeln!(stdout, "{:5}  {}", number, line)?;
        }
        Ok(Outcome::Exited(0))
    }
}

#[derive(FromArgs)]
/// Define aliases with name=value, show one with name, or list all.
pub struct Alias {
    #[argh(positional, greedy)]
    /// definitions (name=value) or names to show.
    pub items: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(self, stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome> {
        if self.items.is_empty() {
            for (name, value) in session.aliases.iter() {
                writeln!(stdout, "{}='{}'", name, value)?;
            }
            return Ok(Outcome::Exited(0));
        }

        let mut missing = Vec::new();
        for item in &self.items {
            match item.split_once('=') {
                Some((name, value)) => session.aliases.define(name, value)?,
                None => match session.aliases.lookup(item) {
                    Some(value) => writeln!(stdout, "{}='{}'", item, value)?,
                    None => missing.push(item.as_str()),
                },
            }
        }
        if !missing.is_empty() {
            bail!("{}: not found", missing.join(", "));
        }
        Ok(Outcome::Exited(0))
    }
}

#[derive(FromArgs)]
/// Remove an alias.
pub struct Unalias {
    #[argh(positional)]
    /// alias to remove.
    pub name: String,
}

impl BuiltinCommand for Unalias {
    fn name() -> &'static str {
        "unalias"
    }

    fn execute(self, _stdout: &mut dyn Write, session: &mut Session) -> Result<Outcome> {
        match session.aliases.remove(&self.name) {
            Some(_) => Ok(Outcome::Exited(0)),
            None => bail!("{}: not found", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::test_support::lock_current_dir;
    use std::collections::HashMap;
    use std::env as stdenv;
    use tempfile::TempDir;

    fn session_in(dir: PathBuf) -> Session {
        Session::new(Environment::with_vars(HashMap::new(), dir), 100)
    }

    fn run_builtin(session: &mut Session, name: &str, args: &[&str]) -> (Result<Outcome>, String) {
        let registry = BuiltinRegistry::default();
        let builtin = registry.create(name, args).expect("registered builtin");
        let mut out = Vec::new();
        let res = builtin.run(&mut out, session);
        (res, String::from_utf8(out).unwrap())
    }

    /// Restores the process working directory when dropped.
    struct CwdGuard(PathBuf);

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = stdenv::set_current_dir(&self.0);
        }
    }

    fn canonical_dirs(count: usize) -> (TempDir, Vec<PathBuf>) {
        let root = TempDir::new().expect("temp dir");
        let dirs = (0..count)
            .map(|i| {
                let p = root.path().join(format!("d{}", i));
                fs::create_dir(&p).unwrap();
                fs::canonicalize(&p).unwrap()
            })
            .collect();
        (root, dirs)
    }

    #[test]
    fn test_registry_knows_builtins() {
        let registry = BuiltinRegistry::default();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            vec!["alias", "cd", "exit", "help", "history", "pwd", "unalias"]
        );
        assert!(!registry.contains("ls"));
        assert!(registry.create("ls", &[]).is_none());
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let mut session = session_in(PathBuf::from("/some/where"));
        let (res, out) = run_builtin(&mut session, "pwd", &[]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(out, "/some/where\n");
    }

    #[test]
    fn test_exit_returns_quit_sentinel() {
        let mut session = session_in(PathBuf::from("/"));
        let (res, out) = run_builtin(&mut session, "exit", &[]);
        assert!(matches!(res.unwrap(), Outcome::Quit));
        assert!(out.is_empty());

        for status in ["0", "3"] {
            let (res, _) = run_builtin(&mut session, "exit", &[status]);
            assert!(matches!(res.unwrap(), Outcome::Quit));
        }
    }

    #[test]
    fn test_help_lists_builtins() {
        let mut session = session_in(PathBuf::from("/"));
        let (res, out) = run_builtin(&mut session, "help", &[]);
        assert_eq!(res.unwrap().status(), 0);
        for name in BuiltinRegistry::default().names() {
            assert!(out.contains(name), "help should mention {}", name);
        }
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let (_root, dirs) = canonical_dirs(1);
        let mut session = session_in(stdenv::current_dir().unwrap());
        let before = session.env.current_dir.clone();

        let target = dirs[0].to_string_lossy().to_string();
        let (res, _) = run_builtin(&mut session, "cd", &[target.as_str()]);
        assert_eq!(res.unwrap().status(), 0);

        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), dirs[0]);
        assert_eq!(session.env.current_dir, dirs[0]);
        assert_eq!(session.env.get_var("PWD"), Some(target));
        assert_eq!(
            session.env.get_var("OLDPWD"),
            Some(before.to_string_lossy().to_string())
        );
    }

    #[test]
    fn test_cd_relative_path_uses_session_dir() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let (root, _dirs) = canonical_dirs(1);
        let root = fs::canonicalize(root.path()).unwrap();
        let mut session = session_in(root.clone());

        let (res, _) = run_builtin(&mut session, "cd", &["d0"]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(session.env.current_dir, root.join("d0"));
    }

    #[test]
    fn test_cd_dash_returns_to_previous_and_home_ignores_history() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let (_root, dirs) = canonical_dirs(3);
        let mut session = session_in(dirs[0].clone());
        session
            .env
            .set_var("HOME", dirs[2].to_string_lossy().to_string());

        let first = dirs[1].to_string_lossy().to_string();
        let second = dirs[2].to_string_lossy().to_string();
        run_builtin(&mut session, "cd", &[first.as_str()]).0.unwrap();
        run_builtin(&mut session, "cd", &[second.as_str()]).0.unwrap();

        let (res, out) = run_builtin(&mut session, "cd", &["-"]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(session.env.current_dir, dirs[1]);
        assert_eq!(out, format!("{}\n", dirs[1].display()));
        // `cd -` itself does not overwrite the remembered directory.
        assert_eq!(session.env.get_var("OLDPWD"), Some(first.clone()));

        let (res, _) = run_builtin(&mut session, "cd", &[]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(session.env.current_dir, dirs[2]);
    }

    #[test]
    fn test_cd_too_many_arguments_changes_nothing() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_in(orig.clone());

        let (res, _) = run_builtin(&mut session, "cd", &["/", "/tmp"]);
        let err = res.unwrap_err();
        assert!(err.to_string().contains("too many arguments"));
        assert_eq!(session.env.current_dir, orig);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_in(orig.clone());

        let name = format!("nonexistent_dir_for_cd_test_{}", std::process::id());
        let (res, _) = run_builtin(&mut session, "cd", &[name.as_str()]);

        assert!(res.is_err());
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(session.env.get_var("OLDPWD"), stdenv::var("OLDPWD").ok());
    }

    #[test]
    fn test_cd_empty_operand_is_an_error() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_in(orig.clone());
        session.env.set_var("HOME", "/");

        let (res, _) = run_builtin(&mut session, "cd", &[""]);
        assert!(res.unwrap_err().to_string().contains("empty directory name"));
        assert_eq!(session.env.current_dir, orig);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_history_prints_numbered_tail() {
        let mut session = session_in(PathBuf::from("/"));
        for line in ["ls", "pwd", "echo hi"] {
            session.history.push(line);
        }
        let (res, out) = run_builtin(&mut session, "history", &["2"]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(out, "    2  pwd\n    3  echo hi\n");

        let (res, out) = run_builtin(&mut session, "history", &[]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_history_rejects_bad_count() {
        let mut session = session_in(PathBuf::from("/"));
        let (res, _) = run_builtin(&mut session, "history", &["many"]);
        assert!(res.is_err());
        let (res, _) = run_builtin(&mut session, "history", &["0"]);
        assert!(res.is_err());
    }

    #[test]
    fn test_alias_define_show_and_remove() {
        let mut session = session_in(PathBuf::from("/"));
        let (res, _) = run_builtin(&mut session, "alias", &["ll=ls -l", "la=ls -a"]);
        assert_eq!(res.unwrap().status(), 0);
        assert_eq!(session.aliases.lookup("ll"), Some("ls -l"));

        let (_, out) = run_builtin(&mut session, "alias", &[]);
        assert_eq!(out, "la='ls -a'\nll='ls -l'\n");

        let (_, out) = run_builtin(&mut session, "alias", &["ll"]);
        assert_eq!(out, "ll='ls -l'\n");

        let (res, _) = run_builtin(&mut session, "alias", &["nope"]);
        assert!(res.is_err());

        let (res, _) = run_builtin(&mut session, "unalias", &["ll"]);
        assert_eq!(res.unwrap().status(), 0);
        let (res, _) = run_builtin(&mut session, "unalias", &["ll"]);
        assert!(res.is_err());
    }
}
