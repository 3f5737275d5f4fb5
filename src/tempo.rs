//! Optional tempo-adjustment stage on the outbound (buffered) path only
//! (§4.10). Reframes audio through an external time-stretch filter over a
//! byte pipe — this engine doesn't implement a stretch algorithm itself,
//! it shells out the same way this codebase's audio-source pipelines
//! already invoke an external decoder over stdin/stdout.

use std::process::Stdio;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::warn;

use crate::error::EngineError;

pub const MIN_RATIO: f32 = 0.5;
pub const MAX_RATIO: f32 = 2.0;

/// Configuration for the external stretch filter. `program` and `args` are
/// a template; `{ratio}` in any arg is substituted with the configured
/// ratio before spawning.
#[derive(Debug, Clone)]
pub struct TempoAdjustConfig {
    pub program: String,
    pub args: Vec<String>,
    pub ratio: f32,
}

impl TempoAdjustConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>, ratio: f32) -> Result<Self, EngineError> {
        if !(MIN_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(EngineError::ConfigError(format!(
                "tempo ratio {ratio} outside allowed range [{MIN_RATIO}, {MAX_RATIO}]"
            )));
        }
        Ok(Self { program: program.into(), args, ratio })
    }

    fn rendered_args(&self) -> Vec<String> {
        self.args.iter().map(|a| a.replace("{ratio}", &self.ratio.to_string())).collect()
    }
}

/// Pipes raw audio bytes through the configured external process and
/// returns whatever it writes back. Never invoked on the real-time inbound
/// path — only on buffered outbound audio, where the extra latency of a
/// process round-trip is acceptable.
pub async fn apply(config: &TempoAdjustConfig, input: &[u8]) -> Result<Bytes, EngineError> {
    let mut child = Command::new(&config.program)
        .args(config.rendered_args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| EngineError::ConfigError(format!("failed to spawn tempo-adjust process: {e}")))?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let mut stdout = child.stdout.take().expect("stdout was piped");

    let input = input.to_vec();
    let write_task = tokio::spawn(async move {
        let _ = stdin.write_all(&input).await;
        drop(stdin);
    });

    let mut output = Vec::new();
    stdout
        .read_to_end(&mut output)
        .await
        .map_err(|e| EngineError::ConfigError(format!("failed to read tempo-adjust output: {e}")))?;

    let _ = write_task.await;
    match child.wait().await {
        Ok(status) if !status.success() => {
            warn!(?status, program = %config.program, "tempo-adjust process exited non-zero");
        }
        Err(e) => warn!(error = %e, "failed to await tempo-adjust process"),
        _ => {}
    }

    Ok(Bytes::from(output))
}
