// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Invocation of opaque external commands.

Archive unpackers, signature tools, and the kernel build system are driven
as subprocesses. A non-zero exit is always a hard failure carrying whatever
diagnostics the tool wrote to stderr.
*/

use {
    crate::error::{FetchError, Result},
    std::process::Output,
    tokio::process::Command,
};

/// Run a command to completion, capturing its output and checking its status.
///
/// Returns the full [Output] so callers can inspect streams; stdout and
/// stderr are never inherited.
pub async fn checked_output(command: &mut Command) -> Result<Output> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    let output = command.output().await?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(FetchError::CommandFailed {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run a command for its side effects.
pub async fn run_checked(command: &mut Command) -> Result<()> {
    checked_output(command).await.map(|_| ())
}

/// Run a command and return its captured stdout.
pub async fn output_checked(command: &mut Command) -> Result<Vec<u8>> {
    checked_output(command).await.map(|output| output.stdout)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = output_checked(Command::new("echo").arg("hi")).await.unwrap();
        assert_eq!(out, b"hi\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let err = run_checked(&mut Command::new("false")).await.unwrap_err();
        assert!(matches!(err, FetchError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn stderr_is_captured_in_the_error() {
        let err = run_checked(
            Command::new("sh").arg("-c").arg("echo boom >&2; exit 2"),
        )
        .await
        .unwrap_err();

        match err {
            FetchError::CommandFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
