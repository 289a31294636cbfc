//! Fake model binaries for driving a `Supervisor` against real processes.
//!
//! Each fake is a `/bin/sh` script written into a temporary directory. The
//! scripts append their argv to `argv.log`, the `FAKE_MODEL_TAG` variable to
//! `env.log` and every stdin line to `input.log` next to themselves, so tests
//! can inspect what was spawned and sent.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tether_core::ModelConfig;
use tether_core::ToolAllowLists;

pub const SESSION_ID: &str = "sess-abc-123";
pub const ANSWER: &str = "the answer is 4";

const PRELUDE: &str = r#"#!/bin/sh
dir=$(dirname "$0")
echo "$*" >> "$dir/argv.log"
echo "${FAKE_MODEL_TAG:-}" >> "$dir/env.log"
echo "fake model booting"
n=0
"#;

/// Answers every line with noise, a system envelope, a streamed delta and a
/// `result`, then keeps waiting for more input.
pub const ANSWERING_MODEL: &str = r#"while IFS= read -r line; do
  n=$((n+1))
  printf '%s\n' "$line" >> "$dir/input.log"
  echo "diagnostic: turn $n"
  printf '%s\n' '{"type":"system","subtype":"init","session_id":"sess-abc-123"}'
  printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"thinking"}}}'
  printf '%s\n' '{"type":"result","result":"the answer is 4","session_id":"sess-abc-123","cost_usd":0.003,"duration_ms":1234}'
done
"#;

/// Writes bytes that are not UTF-8 to stderr, keeps writing to stderr, then
/// answers.
pub const BINARY_STDERR_MODEL: &str = r#"while IFS= read -r line; do
  printf '%s\n' "$line" >> "$dir/input.log"
  printf '\377\376 bad bytes\n' >&2
  sleep 0.3
  printf 'still logging\n' >&2
  printf '%s\n' '{"type":"result","result":"the answer is 4","session_id":"sess-abc-123","duration_ms":"slow"}'
done
"#;

/// Answers the first line normally and reports a compaction before the
/// second answer.
pub const COMPACTING_MODEL: &str = r#"while IFS= read -r line; do
  n=$((n+1))
  printf '%s\n' "$line" >> "$dir/input.log"
  if [ "$n" -ge 2 ]; then
    printf '%s\n' '{"type":"system","subtype":"compact_boundary","session_id":"sess-abc-123"}'
  fi
  printf '%s\n' '{"type":"result","result":"the answer is 4","session_id":"sess-abc-123"}'
done
"#;

/// Streams partial text for the first line and exits without a `result`.
pub const TRUNCATED_MODEL: &str = r#"IFS= read -r line
printf '%s\n' "$line" >> "$dir/input.log"
printf '%s\n' '{"type":"assistant","session_id":"sess-eof","message":{"content":[{"type":"text","text":"cut "}],"usage":{"input_tokens":10,"output_tokens":2}}}'
printf '%s\n' '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"short"}}}'
exit 0
"#;

pub struct FakeModel {
    dir: TempDir,
    binary: PathBuf,
}

impl FakeModel {
    pub fn new(body: &str) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let binary = dir.path().join("fake-model");
        fs::write(&binary, format!("{PRELUDE}{body}"))?;
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))?;
        Ok(Self { dir, binary })
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.binary.display().to_string(), "fake-model-1").with_tools(
            ToolAllowLists {
                read_only: vec!["Read".to_string(), "Grep".to_string()],
                escalated: vec!["Read".to_string(), "Grep".to_string(), "Bash".to_string()],
            },
        )
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// One entry per spawn, in order.
    pub fn argv_log(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("argv.log"))
    }

    /// `FAKE_MODEL_TAG` as seen by each spawn, in order.
    pub fn env_log(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("env.log"))
    }

    /// One entry per stdin line received, across all spawns.
    pub fn input_log(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("input.log"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|contents| contents.lines().map(ToString::to_string).collect())
        .unwrap_or_default()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
