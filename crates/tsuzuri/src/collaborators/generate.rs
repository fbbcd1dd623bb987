//! Generation backends.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};
use tsuzuri_core::{Generator, WorkflowError};

use crate::stage::render_value;

const GENERATOR: &str = "generator";

/// Spawns an external command per request.
///
/// The prompt context is written to the command's stdin as a JSON object;
/// its trimmed stdout is the generated text. The child is killed if the
/// request is dropped, e.g. when the attempt times out.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Creates a generator from an argv list.
    ///
    /// Fails if the list is empty or the program is blank.
    pub fn from_argv(argv: &[String]) -> Result<Self, WorkflowError> {
        match argv.split_first() {
            Some((program, args)) if !program.trim().is_empty() => Ok(Self {
                program: program.clone(),
                args: args.to_vec(),
            }),
            _ => Err(WorkflowError::Configuration(
                "generator.command must be a non-empty array".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(program = %self.program))]
    async fn generate(&self, prompt_context: &Map<String, Value>) -> Result<String, WorkflowError> {
        let payload = serde_json::to_vec(prompt_context)
            .map_err(|e| WorkflowError::producer(GENERATOR, format!("encode prompt: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkflowError::unreachable(GENERATOR, format!("spawn {}: {}", self.program, e))
            })?;

        // Feed stdin while the output is drained, or a child that streams
        // its answer blocks on a full stdout pipe.
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output =
            output.map_err(|e| WorkflowError::unreachable(GENERATOR, format!("wait: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkflowError::unreachable(
                GENERATOR,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }

        // A child may answer without reading all of its input.
        match written {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(WorkflowError::unreachable(
                    GENERATOR,
                    format!("write prompt: {}", e),
                ));
            }
            _ => {}
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| WorkflowError::producer(GENERATOR, "output is not valid UTF-8"))?;
        debug!(bytes = text.len(), "generation finished");
        Ok(text.trim().to_string())
    }
}

/// Offline generator that echoes the prompt context back as text.
///
/// Useful for dry runs and tests: the output is deterministic and never
/// empty as long as the context has an `instruction`.
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt_context: &Map<String, Value>) -> Result<String, WorkflowError> {
        let mut text = prompt_context
            .get("instruction")
            .map(render_value)
            .unwrap_or_default();
        for (key, value) in prompt_context {
            if key == "instruction" || key == "stage" {
                continue;
            }
            let rendered = render_value(value);
            if !rendered.trim().is_empty() {
                text.push_str(&format!("\n\n[{}]\n{}", key, rendered));
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn context() -> Map<String, Value> {
        let mut ctx = Map::new();
        ctx.insert("instruction".to_string(), json!("Write an outline."));
        ctx.insert("topic".to_string(), json!("tea"));
        ctx.insert("feedback".to_string(), json!(""));
        ctx
    }

    #[tokio::test]
    async fn test_echo_generator() {
        let text = EchoGenerator.generate(&context()).await.expect("generate");
        assert_eq!(text, "Write an outline.\n\n[topic]\ntea");
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        assert!(matches!(
            CommandGenerator::from_argv(&[]),
            Err(WorkflowError::Configuration(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_reads_stdin() {
        let generator = CommandGenerator::from_argv(&["cat".to_string()]).expect("argv");
        let text = generator.generate(&context()).await.expect("generate");
        let echoed: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(echoed["topic"], "tea");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_prompt_does_not_block() {
        let generator = CommandGenerator::from_argv(&["cat".to_string()]).expect("argv");
        let mut ctx = context();
        ctx.insert("context".to_string(), json!("x".repeat(1024 * 1024)));

        let text = tokio::time::timeout(Duration::from_secs(20), generator.generate(&ctx))
            .await
            .expect("generation finished in time")
            .expect("generate");

        let echoed: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(echoed["context"].as_str().map(str::len), Some(1024 * 1024));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_is_unreachable() {
        let generator = CommandGenerator::from_argv(&["false".to_string()]).expect("argv");
        let err = generator.generate(&context()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Unreachable { .. }));

        let generator =
            CommandGenerator::from_argv(&["/nonexistent/tsuzuri-generator".to_string()])
                .expect("argv");
        let err = generator.generate(&context()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Unreachable { .. }));
    }
}
