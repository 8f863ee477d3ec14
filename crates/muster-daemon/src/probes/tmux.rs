//! Terminal-multiplexer session probe.

use std::process::Command;

use crate::error::ProbeError;

/// Whether a tmux session with this exact name exists.
///
/// `tmux has-session` exits nonzero both when the session is missing and
/// when no server is running; both mean "no session" here. A missing tmux
/// binary is also "no session" rather than an error, since tmux is optional.
pub async fn has_session(name: &str) -> Result<bool, ProbeError> {
    let target = format!("={name}");
    tokio::task::spawn_blocking(move || {
        match Command::new("tmux")
            .args(["has-session", "-t", &target])
            .output()
        {
            Ok(output) => Ok(output.status.success()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ProbeError::command_with("failed to execute tmux", e)),
        }
    })
    .await
    .map_err(|e| ProbeError::command_with("tmux task join error", e))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nonexistent_session_is_false() {
        // Either tmux is absent (Ok(false)) or the session genuinely does
        // not exist (Ok(false)); both are the same answer.
        let exists = has_session("muster-test-session-that-should-not-exist")
            .await
            .unwrap();
        assert!(!exists);
    }
}
