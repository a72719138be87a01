// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subprocess-backed sandbox host.

use crate::harness;
use crate::{FailureKind, Outcome, SandboxCaps, SandboxFailure, SandboxHost, normalize_inputs};
use async_trait::async_trait;
use serde_json::Value;
use sp_core::Language;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How much trailing stderr to keep for diagnostics.
const STDERR_KEEP_BYTES: usize = 8 * 1024;

/// Interpreter invocation for one language.
#[derive(Debug, Clone)]
pub struct RuntimeCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments; the harness file name is appended by the host.
    pub args: Vec<String>,
}

impl RuntimeCommand {
    /// Create a command with no extra arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Create a command with arguments.
    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Sandbox host that runs each skill in a fresh subprocess.
///
/// Each run stages the blob and harness in a private temp directory, spawns
/// the interpreter with an emptied environment, and enforces the wall-clock
/// deadline with a cooperative grace window before the hard kill. The spawn
/// uses `kill_on_drop`, so cancelling the future (scheduler-side cancel)
/// also reaps the child.
pub struct ProcessSandbox {
    runtimes: HashMap<Language, RuntimeCommand>,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSandbox {
    /// A host with the default interpreter table: `python3`, `deno`, `go`.
    #[must_use]
    pub fn new() -> Self {
        let mut runtimes = HashMap::new();
        runtimes.insert(Language::Python, RuntimeCommand::new("python3"));
        runtimes.insert(
            Language::Typescript,
            RuntimeCommand::with_args("deno", ["run", "--quiet", "--no-prompt"]),
        );
        runtimes.insert(Language::Go, RuntimeCommand::with_args("go", ["run"]));
        Self { runtimes }
    }

    /// Override the interpreter for one language.
    #[must_use]
    pub fn with_runtime(mut self, language: Language, command: RuntimeCommand) -> Self {
        self.runtimes.insert(language, command);
        self
    }

    /// Returns `true` if this host can execute the given language, i.e. the
    /// configured interpreter resolves on `PATH`.
    #[must_use]
    pub fn interpreter_available(&self, language: Language) -> bool {
        let Some(runtime) = self.runtimes.get(&language) else {
            return false;
        };
        let program = std::path::Path::new(&runtime.program);
        if program.is_absolute() {
            return program.exists();
        }
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| dir.join(&runtime.program).exists())
    }

    fn build_command(
        &self,
        language: Language,
        dir: &std::path::Path,
        caps: &SandboxCaps,
    ) -> Result<Command, SandboxFailure> {
        let runtime = self.runtimes.get(&language).ok_or_else(|| {
            SandboxFailure::unavailable(format!("no runtime configured for {language}"))
        })?;

        let mut cmd = Command::new(&runtime.program);
        cmd.args(&runtime.args);
        if language == Language::Typescript && caps.allow_network {
            // Deno permissions must precede the script argument.
            cmd.arg("--allow-net");
        }
        match language {
            // `go run` compiles the package, so it needs both files.
            Language::Go => {
                cmd.arg(harness::harness_file(language));
                cmd.arg(harness::skill_file(language));
            }
            _ => {
                cmd.arg(harness::harness_file(language));
            }
        }

        cmd.current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear();

        // The guest gets a minimal environment: interpreter discovery plus
        // caches that `go run` cannot live without.
        for key in ["PATH", "HOME", "GOCACHE", "GOPATH", "DENO_DIR"] {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        if let Some(limit) = caps.max_memory_bytes {
            cmd.env("SKILLPORT_MAX_MEMORY_BYTES", limit.to_string());
        }

        Ok(cmd)
    }
}

#[async_trait]
impl SandboxHost for ProcessSandbox {
    async fn run(
        &self,
        language: Language,
        blob: &[u8],
        inputs: &Value,
        caps: &SandboxCaps,
    ) -> Outcome {
        let dir = tempfile::tempdir()
            .map_err(|e| SandboxFailure::unavailable(format!("stage dir: {e}")))?;

        tokio::fs::write(dir.path().join(harness::skill_file(language)), blob)
            .await
            .map_err(|e| SandboxFailure::unavailable(format!("stage skill: {e}")))?;
        tokio::fs::write(
            dir.path().join(harness::harness_file(language)),
            harness::harness_source(language),
        )
        .await
        .map_err(|e| SandboxFailure::unavailable(format!("stage harness: {e}")))?;

        let mut cmd = self.build_command(language, dir.path(), caps)?;
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxFailure::unavailable(format!("spawn {language}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxFailure::unavailable("guest stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxFailure::unavailable("guest stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxFailure::unavailable("guest stderr unavailable"))?;

        let payload = serde_json::to_string(&normalize_inputs(inputs))
            .map_err(|e| SandboxFailure::marshalling_failed(format!("encode inputs: {e}")))?;

        // Write the single input line, then close stdin so the guest sees
        // EOF. Write errors mean the guest died instantly; the wait path
        // below will report that better than we can here.
        let _ = stdin.write_all(payload.as_bytes()).await;
        let _ = stdin.write_all(b"\n").await;
        drop(stdin);

        // Read both pipes concurrently so a chatty guest can't deadlock on
        // a full pipe buffer. Stdout is capped; stderr keeps only a tail.
        let cap = caps.max_output_bytes;
        let stdout_task = tokio::spawn(read_capped(stdout, cap));
        let stderr_task = tokio::spawn(read_tail(stderr));

        let status = match tokio::time::timeout(caps.max_wall, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(SandboxFailure::unavailable(format!("wait failed: {e}")));
            }
            Err(_) => {
                // Deadline expired. Give the guest the grace window to wind
                // down on its own (stdin is long closed), then hard-kill.
                debug!(target: "skillport.sandbox", %language, "deadline expired, entering grace window");
                if tokio::time::timeout(crate::KILL_GRACE, child.wait())
                    .await
                    .is_err()
                {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(SandboxFailure::timed_out(format!(
                    "wall-clock limit of {:?} exceeded",
                    caps.max_wall
                )));
            }
        };

        let (stdout_bytes, truncated) = stdout_task
            .await
            .map_err(|e| SandboxFailure::unavailable(format!("stdout reader: {e}")))?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if truncated {
            return Err(SandboxFailure::new(
                FailureKind::OversizeOutput,
                format!("guest output exceeded {cap} bytes"),
            ));
        }

        let text = match String::from_utf8(stdout_bytes) {
            Ok(text) => text,
            Err(_) => {
                return Err(SandboxFailure::marshalling_failed(
                    "guest emitted non-UTF-8 output",
                ));
            }
        };

        match parse_envelope(&text) {
            Some(outcome) => outcome,
            None => {
                if !status.success() {
                    warn!(
                        target: "skillport.sandbox",
                        %language,
                        code = ?status.code(),
                        "guest exited without result envelope"
                    );
                    Err(SandboxFailure::execution_failed(format!(
                        "guest exited with {status}: {}",
                        stderr_tail.trim_end()
                    )))
                } else {
                    Err(SandboxFailure::marshalling_failed(
                        "guest produced no result envelope",
                    ))
                }
            }
        }
    }
}

/// Read up to `cap` bytes; the boolean is `true` when output was truncated
/// (i.e. the guest produced more than the cap).
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(reader: R, cap: u64) -> (Vec<u8>, bool) {
    let mut limited = reader.take(cap + 1);
    let mut buf = Vec::new();
    let _ = limited.read_to_end(&mut buf).await;
    if buf.len() as u64 > cap {
        // Drain the rest so the guest can finish writing and exit.
        let mut inner = limited.into_inner();
        let mut sink = [0u8; 8192];
        while matches!(inner.read(&mut sink).await, Ok(n) if n > 0) {}
        (buf, true)
    } else {
        (buf, false)
    }
}

/// Drain a pipe completely, keeping only the trailing bytes for diagnostics.
async fn read_tail<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    while let Ok(n) = reader.read(&mut chunk).await {
        if n == 0 {
            break;
        }
        kept.extend_from_slice(&chunk[..n]);
        if kept.len() > STDERR_KEEP_BYTES {
            let start = kept.len() - STDERR_KEEP_BYTES;
            kept.drain(..start);
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

/// Parse the last non-empty stdout line as a result envelope.
fn parse_envelope(stdout: &str) -> Option<Outcome> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let obj = value.as_object()?;

    if let Some(ok) = obj.get("ok") {
        return Some(Ok(ok.clone()));
    }
    let err = obj.get("err")?.as_str()?;
    let detail = obj
        .get("detail")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let kind = match err {
        "marshalling_failed" => FailureKind::MarshallingFailed,
        _ => FailureKind::ExecutionFailed,
    };
    Some(Err(SandboxFailure::new(kind, detail)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_ok_value_is_extracted() {
        let outcome = parse_envelope("noise\n{\"ok\": {\"result\": 25}}\n").unwrap();
        assert_eq!(outcome.unwrap(), json!({"result": 25}));
    }

    #[test]
    fn envelope_ok_null_is_a_value() {
        let outcome = parse_envelope("{\"ok\": null}\n").unwrap();
        assert_eq!(outcome.unwrap(), Value::Null);
    }

    #[test]
    fn envelope_error_maps_kind() {
        let outcome =
            parse_envelope("{\"err\": \"marshalling_failed\", \"detail\": \"cycle\"}").unwrap();
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::MarshallingFailed);
        assert_eq!(failure.detail, "cycle");
    }

    #[test]
    fn envelope_unknown_err_defaults_to_execution_failed() {
        let outcome = parse_envelope("{\"err\": \"weird\", \"detail\": \"x\"}").unwrap();
        assert_eq!(outcome.unwrap_err().kind, FailureKind::ExecutionFailed);
    }

    #[test]
    fn last_line_wins_over_guest_noise() {
        let text = "{\"ok\": 1}\nuser printed this\n{\"ok\": 2}\n";
        assert_eq!(parse_envelope(text).unwrap().unwrap(), json!(2));
    }

    #[test]
    fn garbage_stdout_is_no_envelope() {
        assert!(parse_envelope("").is_none());
        assert!(parse_envelope("plain text\n").is_none());
        assert!(parse_envelope("[1, 2, 3]\n").is_none());
    }

    #[tokio::test]
    async fn read_capped_flags_truncation() {
        let data = vec![b'x'; 100];
        let (buf, truncated) = read_capped(&data[..], 40).await;
        assert!(truncated);
        assert!(buf.len() as u64 > 40);

        let (buf, truncated) = read_capped(&data[..], 200).await;
        assert!(!truncated);
        assert_eq!(buf.len(), 100);
    }

    #[tokio::test]
    async fn read_tail_keeps_only_the_end() {
        let data = vec![b'a'; STDERR_KEEP_BYTES * 3];
        let tail = read_tail(&data[..]).await;
        assert_eq!(tail.len(), STDERR_KEEP_BYTES);
    }

    #[test]
    fn runtime_table_covers_all_languages() {
        let host = ProcessSandbox::new();
        for lang in Language::all() {
            assert!(host.runtimes.contains_key(lang), "{lang}");
        }
    }
}
