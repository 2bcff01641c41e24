//! Local command and script execution

use crate::handler::{TaskContext, TaskHandler};
use crate::task::{kinds, ErrorCode, Params, TaskError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Domain code for a command that ran and failed
pub const CUSTOM_COMMAND_FAILED: &str = "CUSTOM_COMMAND_FAILED";

/// Domain code for a script that ran and failed
pub const CUSTOM_SCRIPT_FAILED: &str = "CUSTOM_SCRIPT_FAILED";

/// Longest stdout/stderr excerpt kept in a result or error
const OUTPUT_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// `command` plus `args`, no shell
    Command,
    /// `script` source fed to `interpreter -c`
    Script,
}

/// Runs a local process for `custom_command` and `custom_script` tasks.
///
/// The child is killed if the attempt is cancelled, paused or times out.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    mode: Mode,
}

impl CommandHandler {
    /// Handler for `custom_command`: params `command`, `args`, `cwd`, `env`
    pub fn command() -> Self {
        Self {
            mode: Mode::Command,
        }
    }

    /// Handler for `custom_script`: params `script`, `interpreter`, `cwd`, `env`
    pub fn script() -> Self {
        Self { mode: Mode::Script }
    }

    /// Task type this handler is registered under
    pub fn task_type(&self) -> &'static str {
        match self.mode {
            Mode::Command => kinds::CUSTOM_COMMAND,
            Mode::Script => kinds::CUSTOM_SCRIPT,
        }
    }

    fn failure_code(&self) -> &'static str {
        match self.mode {
            Mode::Command => CUSTOM_COMMAND_FAILED,
            Mode::Script => CUSTOM_SCRIPT_FAILED,
        }
    }

    fn build(&self, ctx: &TaskContext) -> Result<(Command, String), TaskError> {
        let (mut cmd, label) = match self.mode {
            Mode::Command => {
                let program = ctx.str_param("command")?;
                let args = ctx.str_list_param("args")?;
                let mut cmd = Command::new(program);
                cmd.args(&args);
                let label = std::iter::once(program.to_string())
                    .chain(args)
                    .collect::<Vec<_>>()
                    .join(" ");
                (cmd, label)
            }
            Mode::Script => {
                let script = ctx.str_param("script")?;
                let interpreter = ctx.str_param_or("interpreter", "sh");
                let mut cmd = Command::new(interpreter);
                cmd.arg("-c").arg(script);
                (cmd, format!("{interpreter} script"))
            }
        };

        if let Some(cwd) = ctx.param("cwd").and_then(Value::as_str) {
            cmd.current_dir(cwd);
        }

        match ctx.param("env") {
            None | Some(Value::Null) => {}
            Some(Value::Object(vars)) => {
                for (key, value) in vars {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    cmd.env(key, value);
                }
            }
            Some(_) => {
                return Err(TaskError::validation("Parameter 'env' must be an object"));
            }
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok((cmd, label))
    }
}

#[async_trait]
impl TaskHandler for CommandHandler {
    fn required_params(&self) -> &[&'static str] {
        match self.mode {
            Mode::Command => &["command"],
            Mode::Script => &["script"],
        }
    }

    fn validate(&self, params: &Params) -> Result<(), TaskError> {
        crate::handler::check_required(params, self.required_params())?;

        let key = self.required_params()[0];
        match params.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            _ => {
                return Err(TaskError::validation(format!(
                    "Parameter '{key}' must be a non-empty string"
                )))
            }
        }

        if let Some(args) = params.get("args") {
            let valid = match args {
                Value::Null => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            };
            if !valid {
                return Err(TaskError::validation(
                    "Parameter 'args' must be a list of strings",
                ));
            }
        }

        Ok(())
    }

    async fn execute(&self, ctx: TaskContext) -> Result<Value, TaskError> {
        let (mut cmd, label) = self.build(&ctx)?;

        ctx.report(10, format!("Starting {label}")).await;
        info!(task_id = ctx.task_id(), "Running {}", label);

        let child = cmd.spawn().map_err(|e| {
            TaskError::from(e).with_details(json!({ "command": label }))
        })?;

        ctx.report(30, "Waiting for process to exit").await;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = ctx.cancelled() => {
                debug!(task_id = ctx.task_id(), "Process interrupted");
                return Err(TaskError::new(ErrorCode::Cancelled, "Process interrupted")
                    .with_retryable(false));
            }
        };

        let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code();

        if !output.status.success() {
            let message = match exit_code {
                Some(code) => format!("{label} exited with code {code}"),
                None => format!("{label} was terminated by a signal"),
            };
            return Err(TaskError::domain(self.failure_code(), message)
                .with_retryable(false)
                .with_details(json!({
                    "exit_code": exit_code,
                    "stdout": stdout,
                    "stderr": stderr,
                })));
        }

        ctx.report(100, "Process finished").await;

        Ok(json!({
            "command": label,
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= OUTPUT_LIMIT {
        return text.to_string();
    }
    let mut end = OUTPUT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
