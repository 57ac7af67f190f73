//! Autosign policy: decides, without human intervention, whether a submitted
//! CSR gets signed. The policy value is either a decided boolean, a whitelist
//! file of certnames and glob patterns, or an executable policy script that
//! receives the certname as argv[1] and the CSR PEM on stdin.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error};

use crate::config::Autosign;
use crate::error::{CaError, Result};

const RUBYLIB_ENV: &str = "RUBYLIB";

#[cfg(windows)]
const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: &str = ":";

/// Evaluates the autosign policy for one submission.
///
/// `csr_pem` is the fully buffered CSR; the engine may feed it to a policy
/// script while the caller retains it for signing.
///
/// # Errors
/// Returns `Io` if a whitelist file exists but cannot be read. Script launch
/// failures and timeouts are policy outcomes ("do not sign"), not errors.
pub async fn should_autosign(
    autosign: &Autosign,
    subject: &str,
    csr_pem: &[u8],
    load_path: &[String],
    timeout: Option<Duration>,
) -> Result<bool> {
    let source = match autosign {
        Autosign::Decided(value) => return Ok(*value),
        Autosign::Source(path) => path,
    };

    let metadata = match fs::metadata(source).await {
        Ok(metadata) => metadata,
        Err(_) => {
            debug!(
                "Autosign source {} does not exist; treating {subject} as not autosignable",
                source.display()
            );
            return Ok(false);
        }
    };

    if metadata.is_file() && is_executable(&metadata) {
        return Ok(run_autosign_script(source, subject, csr_pem, load_path, timeout).await);
    }

    let contents = fs::read_to_string(source).await.map_err(|e| {
        CaError::io(
            format!("Failed to read autosign whitelist {}", source.display()),
            e,
        )
    })?;
    Ok(whitelist_matches(&contents, subject))
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Applies whitelist matching: comment and blank lines are skipped, lines
/// with an embedded `#` or space are rejected and logged, `*` matches
/// everything, a leading `*` triggers glob matching, anything else must equal
/// the subject exactly.
#[must_use]
pub fn whitelist_matches(contents: &str, subject: &str) -> bool {
    for line in contents.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if line.contains('#') || line.contains(' ') {
            error!("Invalid autosign entry {line:?}: entries must not contain '#' or spaces");
            continue;
        }
        let hit = if line == "*" {
            true
        } else if line.starts_with('*') {
            glob_matches(line, subject)
        } else {
            line == subject
        };
        if hit {
            return true;
        }
    }
    false
}

/// Domain-glob matching: both sides are lowercased and split on `.`, the
/// label sequences are reversed, the wildcard label is dropped from the glob,
/// and the subject matches iff its reversed labels start with the remaining
/// reversed glob labels. `*.foo.bar` matches `agent.foo.bar` and
/// `x.y.foo.bar`; `*.baz` matches `baz` itself.
#[must_use]
pub fn glob_matches(glob: &str, subject: &str) -> bool {
    let glob = glob.to_lowercase();
    let subject = subject.to_lowercase();

    let mut glob_labels: Vec<&str> = glob.split('.').rev().collect();
    glob_labels.pop();
    let subject_labels: Vec<&str> = subject.split('.').rev().collect();

    subject_labels.starts_with(&glob_labels)
}

/// Builds the RUBYLIB value handed to a policy script: the parent RUBYLIB (if
/// any) followed by the load-path entries, absolutized, joined with the
/// platform path-list separator.
#[must_use]
pub fn rubylib_value(existing: Option<&str>, load_path: &[String]) -> String {
    let mut entries: Vec<String> = Vec::new();
    if let Some(existing) = existing {
        if !existing.is_empty() {
            entries.push(existing.to_string());
        }
    }
    for entry in load_path {
        let absolute = std::path::absolute(entry)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| entry.clone());
        entries.push(absolute);
    }
    entries.join(PATH_LIST_SEPARATOR)
}

/// Runs an executable autosign policy script. Exit 0 means "sign"; any other
/// exit, launch failure, or timeout means "do not sign".
async fn run_autosign_script(
    script: &Path,
    subject: &str,
    csr_pem: &[u8],
    load_path: &[String],
    timeout: Option<Duration>,
) -> bool {
    let rubylib = rubylib_value(std::env::var(RUBYLIB_ENV).ok().as_deref(), load_path);
    debug!(
        "Running autosign script {} for {subject} (RUBYLIB={rubylib})",
        script.display()
    );

    let mut command = Command::new(script);
    command
        .arg(subject)
        .env(RUBYLIB_ENV, rubylib)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(
                "Failed to launch autosign script {}: {err}",
                script.display()
            );
            return false;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        // The script is free to exit without draining stdin; a broken pipe
        // here is not a policy failure.
        if let Err(err) = stdin.write_all(csr_pem).await {
            debug!("Autosign script did not consume the CSR: {err}");
        }
        drop(stdin);
    }

    let stdout_handle = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_handle = tokio::spawn(read_stream(child.stderr.take()));

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(waited) => waited,
            Err(_) => {
                if let Err(err) = child.kill().await {
                    error!("Failed to kill timed out autosign script: {err}");
                }
                let _ = child.wait().await;
                let _ = stdout_handle.await;
                let _ = stderr_handle.await;
                error!(
                    "Autosign script {} timed out after {}s; treating {subject} as not autosignable",
                    script.display(),
                    limit.as_secs()
                );
                return false;
            }
        },
        None => child.wait().await,
    };

    let status = match waited {
        Ok(status) => status,
        Err(err) => {
            error!("Failed to wait for autosign script: {err}");
            return false;
        }
    };

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();
    if !stdout.trim().is_empty() {
        debug!("Autosign script stdout: {}", stdout.trim());
    }
    if !stderr.trim().is_empty() {
        debug!("Autosign script stderr: {}", stderr.trim());
    }

    if !status.success() {
        debug!("Autosign script denied {subject} ({status})");
    }
    status.success()
}

async fn read_stream<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };

    let mut buffer = String::new();
    if let Err(err) = stream.read_to_string(&mut buffer).await {
        debug!("Failed to read autosign script output: {err}");
    }
    buffer
}
