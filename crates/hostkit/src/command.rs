//! Shell command execution

use anyhow::{Context, Result};
use declarative::{CommandResult, CommandRunner, CommandSpec};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs exec bodies and guards through `/bin/sh -c`
///
/// Commands with a timeout run in their own process group. When the
/// timeout fires the whole group is killed, so every stage of a pipeline
/// like `curl ... | sh -` goes down with the shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn command_for(&self, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&spec.command).stdin(Stdio::null());

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        if !spec.path.is_empty() {
            let mut search = spec.path.clone();
            if let Ok(current) = std::env::var("PATH") {
                search.push(current);
            }
            cmd.env("PATH", search.join(":"));
        }
        for (key, value) in &spec.environment {
            cmd.env(key, value);
        }
        cmd
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        log::debug!("Running ({:?}): {}", spec.purpose, spec.command);
        let cmd = self.command_for(spec);
        let result = match spec.timeout {
            Some(timeout) => run_with_timeout(cmd, timeout),
            None => run_to_end(cmd),
        }
        .with_context(|| format!("Failed to execute: {}", spec.command))?;

        log::debug!("Exit status {:?}: {}", result.status, spec.command);
        Ok(result)
    }
}

fn run_to_end(mut cmd: Command) -> std::io::Result<CommandResult> {
    cmd.output().map(CommandResult::from)
}

/// Run a command, killing it once `timeout` elapses
///
/// A killed command reports no exit status.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> std::io::Result<CommandResult> {
    let mut child = cmd
        .process_group(0)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let exited = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status.code());
        }
        if Instant::now() >= deadline {
            kill(&mut child);
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let Some(status) = exited else {
        // Grandchildren may still hold the pipes open; leave the readers behind
        return Ok(CommandResult {
            status: None,
            stdout: Vec::new(),
            stderr: format!("timed out after {}s", timeout.as_secs_f64()).into_bytes(),
        });
    };
    Ok(CommandResult {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Kill the child's process group, falling back to the child alone
fn kill(child: &mut Child) {
    let group = child.id();
    let killed_group = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -s KILL -- -{group}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success());

    if !killed_group {
        log::warn!("Could not kill process group {group}; killing the shell only");
        if let Err(e) = child.kill() {
            log::warn!("Failed to kill timed out command: {e}");
        }
    }
    let _ = child.wait();
}

/// Run a backend program (apt-get, systemctl) and capture its output
pub(crate) fn run_program(program: &str, args: &[&str], env: &[(&str, &str)]) -> crate::Result<Output> {
    log::debug!("Running: {program} {}", args.join(" "));
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().map_err(|e| crate::Error::Other(format!("failed to execute {program}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::CommandPurpose;
    use std::os::unix::fs::PermissionsExt;

    fn action(command: &str) -> CommandSpec {
        CommandSpec::new(command, CommandPurpose::Action)
    }

    #[test]
    fn test_exit_status_and_output() {
        let result = ShellRunner::new()
            .run(&action("echo hello; echo oops >&2; exit 3"))
            .unwrap();
        assert_eq!(result.status, Some(3));
        assert_eq!(result.stdout_str().trim(), "hello");
        assert_eq!(result.stderr_str().trim(), "oops");
    }

    #[test]
    fn test_environment_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = action("printf '%s:%s' \"$GREETING\" \"$(pwd)\"");
        spec.environment = vec![("GREETING".to_string(), "hi".to_string())];
        spec.cwd = Some(dir.path().to_path_buf());

        let result = ShellRunner::new().run(&spec).unwrap();
        let expected_dir = dir.path().canonicalize().unwrap();
        assert_eq!(
            result.stdout_str(),
            format!("hi:{}", expected_dir.display())
        );
    }

    #[test]
    fn test_path_is_prepended() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("edge-tool");
        std::fs::write(&tool, "#!/bin/sh\necho found\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut spec = action("command -v edge-tool");
        spec.path = vec![dir.path().display().to_string()];
        let result = ShellRunner::new().run(&spec).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_str().trim(), tool.display().to_string());
    }

    #[test]
    fn test_timeout_kills_command() {
        let mut spec = action("exec sleep 5");
        spec.timeout = Some(Duration::from_millis(200));

        let started = Instant::now();
        let result = ShellRunner::new().run(&spec).unwrap();
        assert_eq!(result.status, None);
        assert!(result.stderr_str().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    /// Dead or zombie, per /proc
    fn process_gone(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).map_or(true, |stat| {
            stat.rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with('Z'))
        })
    }

    #[test]
    fn test_timeout_kills_whole_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("background.pid");
        let mut spec = action(&format!(
            "sleep 30 & echo $! > {}; sleep 30 | cat",
            pid_file.display()
        ));
        spec.timeout = Some(Duration::from_millis(500));

        let result = ShellRunner::new().run(&spec).unwrap();
        assert_eq!(result.status, None);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !process_gone(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(process_gone(pid), "background process {pid} outlived the timeout");
    }

    #[test]
    fn test_fast_command_within_timeout() {
        let mut spec = action("exit 0");
        spec.timeout = Some(Duration::from_secs(5));
        assert!(ShellRunner::new().run(&spec).unwrap().success());
    }
}
