//! Pre-connect hook: an optional executable run before every attempt.
//!
//! The hook never blocks an attempt. Its output and exit status are only
//! reported.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;

pub(crate) const NO_HOOK: &str = "No pre-connection hook has been configured.";

/// Run the hook at `path` with no arguments, passing every non-empty output
/// line and the final result to `log`.
pub(crate) async fn run_preconnect_hook(path: &Path, mut log: impl FnMut(String)) {
    if !path.is_file() {
        log(NO_HOOK.to_string());
        return;
    }
    let label = path.display();

    let mut child = match Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            log(format!("Pre-connect hook ({}) could not be started: {}", label, e));
            return;
        }
    };

    let mut stdout = child.stdout.take().map(BufReader::new);
    let mut stderr = child.stderr.take().map(BufReader::new);

    while stdout.is_some() || stderr.is_some() {
        let (from_stdout, line) = tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => (true, line),
            line = next_line(&mut stderr), if stderr.is_some() => (false, line),
        };
        match line {
            Some(line) => {
                let line = line.trim_end();
                if !line.is_empty() {
                    log(line.to_string());
                }
            }
            None if from_stdout => stdout = None,
            None => stderr = None,
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            log(format!(
                "Pre-connect hook ({}) ran successfully with exit code: 0",
                label
            ));
        }
        Ok(status) => {
            let code = status
                .code()
                .map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string());
            tracing::warn!("Pre-connect hook {} exited with {}", label, status);
            log(format!(
                "Pre-connect hook ({}) failed with exit code: {}",
                label, code
            ));
        }
        Err(e) => {
            log(format!("Pre-connect hook ({}) failed: {}", label, e));
        }
    }
}

/// Next line of hook output, with invalid UTF-8 replaced. `None` at end of
/// stream or on a read error.
async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut Option<R>) -> Option<String> {
    let reader = reader.as_mut()?;
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
    }
}
