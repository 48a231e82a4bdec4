//! External conversion tool invocation.
//!
//! The tool is called as `<program> [args...] <archive> <target>` and owns
//! the target artifact entirely. Exit status 0 means success.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::error::{ConvertError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A configured external conversion tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), timeout: None }
    }

    /// Leading arguments passed before the archive and target paths.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(config.program.clone())
            .with_args(config.args.iter().cloned())
            .with_timeout(config.timeout())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The command line that [`run`](Self::run) executes.
    pub fn command(&self, archive: &Path, target: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg(archive);
        cmd.arg(target);
        cmd
    }

    /// Run the tool to completion (or until the timeout elapses).
    pub fn run(&self, archive: &Path, target: &Path) -> Result<()> {
        info!("Running {} {} {}", self.program, archive.display(), target.display());

        let mut child = self
            .command(archive, target)
            .spawn()
            .map_err(|source| ConvertError::Spawn { program: self.program.clone(), source })?;

        let status = match self.timeout {
            None => child.wait().map_err(|e| self.wait_error(e))?,
            Some(timeout) => match wait_bounded(&mut child, timeout)
                .map_err(|e| self.wait_error(e))?
            {
                Some(status) => status,
                None => {
                    warn!("{} exceeded {:?}, killing it", self.program, timeout);
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill {}: {}", self.program, e);
                    }
                    // reap so no zombie is left behind
                    if let Err(e) = child.wait() {
                        warn!("Failed to reap {}: {}", self.program, e);
                    }
                    return Err(ConvertError::Timeout { program: self.program.clone(), timeout });
                }
            },
        };

        if !status.success() {
            return Err(ConvertError::ConversionTool {
                program: self.program.clone(),
                code: status.code(),
            });
        }

        debug!("{} finished: {}", self.program, status);
        Ok(())
    }

    fn wait_error(&self, source: std::io::Error) -> ConvertError {
        ConvertError::io(PathBuf::from(&self.program), source)
    }
}

/// Poll `child` until it exits or `timeout` elapses. `None` means timed out.
fn wait_bounded(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_appends_archive_then_target() {
        let tool = ExternalTool::new("convert-tensor").with_args(["--quiet"]);
        let cmd = tool.command(Path::new("/m/model.npz"), Path::new("/m/model.ot"));
        assert_eq!(cmd.get_program(), "convert-tensor");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["--quiet", "/m/model.npz", "/m/model.ot"]);
    }

    #[test]
    fn from_config_copies_every_field() {
        let config = ToolConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 0".into()],
            timeout_secs: Some(5),
        };
        let tool = ExternalTool::from_config(&config);
        assert_eq!(tool.program(), "sh");
        assert_eq!(tool.timeout(), Some(Duration::from_secs(5)));
        let expected = ExternalTool::new("sh")
            .with_args(["-c", "exit 0"])
            .with_timeout(Some(Duration::from_secs(5)));
        assert_eq!(tool, expected);
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let tool = ExternalTool::new("ckpt-convert-no-such-tool-7f3a");
        let err = tool.run(Path::new("a.npz"), Path::new("b.ot")).unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_is_success() {
        let tool = ExternalTool::new("true");
        tool.run(Path::new("a.npz"), Path::new("b.ot")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_code_is_propagated() {
        // `sh -c SCRIPT NAME ARCHIVE TARGET`: the script sees ARCHIVE as $1
        let tool = ExternalTool::new("sh").with_args(["-c", "exit 7", "tool"]);
        let err = tool.run(Path::new("a.npz"), Path::new("b.ot")).unwrap_err();
        assert_eq!(err.tool_exit_code(), Some(7));
    }

    #[cfg(unix)]
    #[test]
    fn tool_receives_exactly_two_positionals() {
        let tool = ExternalTool::new("sh").with_args([
            "-c",
            r#"[ "$#" -eq 2 ] && [ "$1" = a.npz ] && [ "$2" = b.ot ]"#,
            "tool",
        ]);
        tool.run(Path::new("a.npz"), Path::new("b.ot")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn hung_tool_times_out() {
        let tool = ExternalTool::new("sh")
            .with_args(["-c", "exec sleep 30", "tool"])
            .with_timeout(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let err = tool.run(Path::new("a.npz"), Path::new("b.ot")).unwrap_err();
        assert!(matches!(err, ConvertError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn fast_tool_finishes_within_timeout() {
        let tool = ExternalTool::new("true").with_timeout(Some(Duration::from_secs(10)));
        tool.run(Path::new("a.npz"), Path::new("b.ot")).unwrap();
    }
}
