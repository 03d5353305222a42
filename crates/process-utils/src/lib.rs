//! Child-process helpers shared across the workspace.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

impl NoWindowExt for Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a command whose output is captured by the caller.
///
/// stdin is closed, stdout and stderr are piped, and the child is killed if
/// its handle is dropped before it was reaped.
pub fn piped_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = tokio_command(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Kill a child and wait up to `grace` for it to be reaped.
///
/// Returns the exit status if the child was reaped in time. A child that has
/// already exited is simply reaped.
pub async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    // start_kill fails only when the child is already gone
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_piped_command_captures_stdout() {
        let output = piped_command("sh")
            .args(["-c", "printf hello"])
            .output()
            .await
            .unwrap();

        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[tokio::test]
    async fn test_terminate_kills_long_running_child() {
        let mut child = piped_command("sleep").arg("30").spawn().unwrap();

        let status = terminate(&mut child, Duration::from_secs(5)).await;

        let status = status.expect("child should be reaped");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_reaps_exited_child() {
        let mut child = piped_command("true").spawn().unwrap();
        child.wait().await.unwrap();

        let status = terminate(&mut child, Duration::from_secs(1)).await;

        assert!(status.is_some_and(|s| s.success()));
    }
}
