// SPDX-License-Identifier: MIT
//! External process plumbing
//!
//! Every DjVuLibre tool is launched through [`Subprocess`], which spawns
//! children with a sanitized environment and classifies how they ended:
//! clean exit, non-zero exit code, or death by signal. [`require`] checks
//! up front that the needed executables are on `PATH`, so a long batch run
//! fails before any work is done rather than halfway through.

use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command};
use std::sync::LazyLock;

use tracing::debug;

/// Errors from launching or waiting on external tools
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("command not found: {command}")]
    CommandNotFound { command: String },

    #[error("command {command:?} returned non-zero exit status {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("command {command:?} was interrupted by signal {signal}")]
    CommandInterrupted { command: String, signal: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The process environment with locale settings neutralized.
///
/// External tools parse their own output formats; locale-dependent number
/// or message formatting breaks that parsing. All `LC_*`, `LANG` and
/// `LANGUAGE` variables are stripped, except that the one effective
/// character-classification locale survives as `LC_CTYPE` so non-ASCII
/// page names still round-trip.
static BASE_ENV: LazyLock<Vec<(OsString, OsString)>> =
    LazyLock::new(|| sanitize_env(env::vars_os()));

fn sanitize_env<I>(vars: I) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let vars: Vec<(OsString, OsString)> = vars.into_iter().collect();
    let lookup = |wanted: &str| {
        vars.iter()
            .find(|(key, _)| key.to_str() == Some(wanted))
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty())
    };
    let ctype = lookup("LC_ALL")
        .or_else(|| lookup("LC_CTYPE"))
        .or_else(|| lookup("LANG"));
    let mut sanitized: Vec<(OsString, OsString)> = vars
        .into_iter()
        .filter(|(key, _)| match key.to_str() {
            Some(key) => !(key.starts_with("LC_") || key == "LANG" || key == "LANGUAGE"),
            None => true,
        })
        .collect();
    if let Some(value) = ctype {
        sanitized.push((OsString::from("LC_CTYPE"), value));
    }
    sanitized
}

/// A spawned external tool.
///
/// Wraps [`std::process::Child`] with the environment policy above and a
/// [`wait`](Subprocess::wait) that turns the three exit outcomes into
/// distinct errors carrying the command name.
#[derive(Debug)]
pub struct Subprocess {
    child: Child,
    command: String,
}

impl Subprocess {
    /// Spawn `argv` with default stdio.
    pub fn new<S: AsRef<OsStr>>(argv: &[S]) -> Result<Self, IpcError> {
        Self::with(argv, |_| {})
    }

    /// Spawn `argv`, letting `configure` adjust stdio redirections, the
    /// working directory, or explicit environment overrides before launch.
    ///
    /// Overrides applied by `configure` win over the sanitized base
    /// environment.
    pub fn with<S, F>(argv: &[S], configure: F) -> Result<Self, IpcError>
    where
        S: AsRef<OsStr>,
        F: FnOnce(&mut Command),
    {
        let (program, arguments) = argv.split_first().ok_or_else(|| {
            IpcError::Io(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))
        })?;
        let command_name = program.as_ref().to_string_lossy().into_owned();
        let mut command = Command::new(program.as_ref());
        command.args(arguments.iter().map(|argument| argument.as_ref()));
        command.env_clear();
        command.envs(BASE_ENV.iter().map(|(key, value)| (key.as_os_str(), value.as_os_str())));
        configure(&mut command);
        debug!("+ {}", shell_escape(argv));
        let child = command.spawn().map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                IpcError::CommandNotFound { command: command_name.clone() }
            } else {
                IpcError::Io(error)
            }
        })?;
        Ok(Self { child, command: command_name })
    }

    /// The command name this process was launched as.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Take the child's stdin handle, if it was piped.
    pub fn stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the child's stdout handle, if it was piped.
    pub fn stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the child to finish.
    ///
    /// Exit status 0 is success; a positive exit code becomes
    /// [`IpcError::CommandFailed`]; termination by signal becomes
    /// [`IpcError::CommandInterrupted`] carrying the symbolic signal name.
    pub fn wait(&mut self) -> Result<(), IpcError> {
        let status = self.child.wait()?;
        if status.success() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Err(IpcError::CommandInterrupted {
                    command: self.command.clone(),
                    signal: signal_name(signal),
                });
            }
        }
        let code = status.code().unwrap_or(-1);
        Err(IpcError::CommandFailed { command: self.command.clone(), code })
    }
}

/// Check that every named executable exists somewhere on `PATH`.
///
/// Fails fast with [`IpcError::CommandNotFound`] naming the first missing
/// tool, before any page has been processed.
pub fn require(commands: &[&str]) -> Result<(), IpcError> {
    for &command in commands {
        locate(command)?;
    }
    Ok(())
}

fn locate(command: &str) -> Result<PathBuf, IpcError> {
    let search_path = env::var_os("PATH").unwrap_or_default();
    for directory in env::split_paths(&search_path) {
        let candidate = directory.join(command);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(IpcError::CommandNotFound { command: command.to_string() })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Signal number to symbolic name, built once.
///
/// Aliased numbers (SIGABRT/SIGIOT, SIGCHLD/SIGCLD) keep the canonical
/// name listed first.
#[cfg(unix)]
static SIGNAL_NAMES: LazyLock<std::collections::HashMap<i32, &'static str>> =
    LazyLock::new(|| {
        let entries: &[(i32, &str)] = &[
            (libc::SIGHUP, "SIGHUP"),
            (libc::SIGINT, "SIGINT"),
            (libc::SIGQUIT, "SIGQUIT"),
            (libc::SIGILL, "SIGILL"),
            (libc::SIGTRAP, "SIGTRAP"),
            (libc::SIGABRT, "SIGABRT"),
            (libc::SIGBUS, "SIGBUS"),
            (libc::SIGFPE, "SIGFPE"),
            (libc::SIGKILL, "SIGKILL"),
            (libc::SIGUSR1, "SIGUSR1"),
            (libc::SIGSEGV, "SIGSEGV"),
            (libc::SIGUSR2, "SIGUSR2"),
            (libc::SIGPIPE, "SIGPIPE"),
            (libc::SIGALRM, "SIGALRM"),
            (libc::SIGTERM, "SIGTERM"),
            (libc::SIGCHLD, "SIGCHLD"),
            (libc::SIGCONT, "SIGCONT"),
            (libc::SIGSTOP, "SIGSTOP"),
            (libc::SIGTSTP, "SIGTSTP"),
            (libc::SIGTTIN, "SIGTTIN"),
            (libc::SIGTTOU, "SIGTTOU"),
            (libc::SIGURG, "SIGURG"),
            (libc::SIGXCPU, "SIGXCPU"),
            (libc::SIGXFSZ, "SIGXFSZ"),
            (libc::SIGVTALRM, "SIGVTALRM"),
            (libc::SIGPROF, "SIGPROF"),
            (libc::SIGWINCH, "SIGWINCH"),
            (libc::SIGIO, "SIGIO"),
            (libc::SIGSYS, "SIGSYS"),
        ];
        let mut names = std::collections::HashMap::new();
        for &(number, name) in entries {
            names.entry(number).or_insert(name);
        }
        names
    });

/// Human-readable name for a signal number, falling back to the number.
pub fn signal_name(number: i32) -> String {
    #[cfg(unix)]
    if let Some(name) = SIGNAL_NAMES.get(&number) {
        return (*name).to_string();
    }
    number.to_string()
}

/// Render a command line the way a shell would accept it, for logging.
pub fn shell_escape<S: AsRef<OsStr>>(argv: &[S]) -> String {
    argv.iter()
        .map(|argument| quote(&argument.as_ref().to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(argument: &str) -> String {
    let safe = |byte: u8| byte.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(&byte);
    if !argument.is_empty() && argument.bytes().all(safe) {
        argument.to_string()
    } else {
        format!("'{}'", argument.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::process::Stdio;

    #[test]
    fn test_sanitize_env_strips_locale() {
        let vars = vec![
            (OsString::from("PATH"), OsString::from("/bin")),
            (OsString::from("LANG"), OsString::from("de_DE.UTF-8")),
            (OsString::from("LANGUAGE"), OsString::from("de")),
            (OsString::from("LC_NUMERIC"), OsString::from("de_DE.UTF-8")),
        ];
        let sanitized = sanitize_env(vars);
        assert!(sanitized.iter().any(|(key, _)| key == "PATH"));
        assert!(!sanitized.iter().any(|(key, _)| key == "LANG"));
        assert!(!sanitized.iter().any(|(key, _)| key == "LANGUAGE"));
        assert!(!sanitized.iter().any(|(key, _)| key == "LC_NUMERIC"));
        let ctype = sanitized.iter().find(|(key, _)| key == "LC_CTYPE");
        assert_eq!(ctype.map(|(_, value)| value.as_os_str()), Some(OsStr::new("de_DE.UTF-8")));
    }

    #[test]
    fn test_sanitize_env_lc_all_wins() {
        let vars = vec![
            (OsString::from("LC_ALL"), OsString::from("C.UTF-8")),
            (OsString::from("LC_CTYPE"), OsString::from("en_US.UTF-8")),
        ];
        let sanitized = sanitize_env(vars);
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].0, "LC_CTYPE");
        assert_eq!(sanitized[0].1, "C.UTF-8");
    }

    #[test]
    fn test_wait_success() {
        let mut process = Subprocess::new(&["true"]).unwrap();
        assert!(process.wait().is_ok());
    }

    #[test]
    fn test_wait_exit_code() {
        let mut process = Subprocess::new(&["sh", "-c", "exit 2"]).unwrap();
        match process.wait() {
            Err(IpcError::CommandFailed { command, code }) => {
                assert_eq!(command, "sh");
                assert_eq!(code, 2);
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_interrupted_by_signal() {
        let mut process = Subprocess::new(&["sh", "-c", "kill -TERM $$"]).unwrap();
        match process.wait() {
            Err(IpcError::CommandInterrupted { command, signal }) => {
                assert_eq!(command, "sh");
                assert_eq!(signal, "SIGTERM");
            }
            other => panic!("expected CommandInterrupted, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_not_found() {
        let result = Subprocess::new(&["djvu-assembler-no-such-tool"]);
        match result {
            Err(IpcError::CommandNotFound { command }) => {
                assert_eq!(command, "djvu-assembler-no-such-tool");
            }
            other => panic!("expected CommandNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_captured_stdout() {
        let mut process = Subprocess::with(&["sh", "-c", "printf ok"], |command| {
            command.stdout(Stdio::piped());
        })
        .unwrap();
        let mut output = String::new();
        process.stdout().unwrap().read_to_string(&mut output).unwrap();
        process.wait().unwrap();
        assert_eq!(output, "ok");
    }

    #[test]
    fn test_child_sees_sanitized_locale() {
        let mut process = Subprocess::with(&["sh", "-c", "printf %s \"${LANGUAGE:-unset}\""], |command| {
            command.stdout(Stdio::piped());
        })
        .unwrap();
        let mut output = String::new();
        process.stdout().unwrap().read_to_string(&mut output).unwrap();
        process.wait().unwrap();
        assert_eq!(output, "unset");
    }

    #[test]
    fn test_require_present() {
        assert!(require(&["sh"]).is_ok());
    }

    #[test]
    fn test_require_missing() {
        match require(&["sh", "djvu-assembler-no-such-tool"]) {
            Err(IpcError::CommandNotFound { command }) => {
                assert_eq!(command, "djvu-assembler-no-such-tool");
            }
            other => panic!("expected CommandNotFound, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_name_lookup() {
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(libc::SIGABRT), "SIGABRT");
        assert_eq!(signal_name(0), "0");
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape(&["cjb2", "-losslevel", "0"]), "cjb2 -losslevel 0");
        assert_eq!(shell_escape(&["sh", "-c", "exit 2"]), "sh -c 'exit 2'");
        assert_eq!(shell_escape(&["printf", "it's"]), r#"printf 'it'\''s'"#);
    }
}
