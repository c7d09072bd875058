use std::env;
use std::io;

use async_trait::async_trait;
use parley_core::tool::{
    Error as ToolError, Tool, ToolCall, ToolResult,
};
use tokio::process::Command;

const CMDLINE_FIELD: &str = "cmdline";

/// A tool for running shell commands.
///
/// The command line comes from the `<cmdline>` field of the command
/// block.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        r#"
Runs arbitrary commands like using a terminal.
The command line should be single line if possible. Strings collected from stdout and stderr will be returned as the tool's output."#
    }

    async fn execute(&self, call: ToolCall) -> ToolResult {
        let Some(cmdline) = call.block.field(CMDLINE_FIELD) else {
            return Err(ToolError::missing_field(CMDLINE_FIELD));
        };
        run_command_line(cmdline).await.map_err(|err| {
            ToolError::execution_error().with_reason(format!("{err}"))
        })
    }
}

#[inline]
fn create_command_with_inferred_shell() -> Command {
    let Some(shell) = env::var_os("SHELL") else {
        return Command::new("/bin/sh");
    };
    Command::new(shell)
}

#[inline]
async fn run_command_line(cmdline: &str) -> Result<String, io::Error> {
    let output = create_command_with_inferred_shell()
        .arg("-c")
        .arg(cmdline)
        .output()
        .await?;

    let mut result = String::new();
    if !output.stdout.is_empty() {
        result.push_str("==> STDOUT <==\n");
        result.push_str(&String::from_utf8_lossy(&output.stdout));
    }
    if !output.stderr.is_empty() {
        result.push_str("\n==> STDERR <==\n");
        result.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_line() {
        let result = run_command_line("echo 'Hello, World!'").await;
        assert_eq!(result.unwrap(), "==> STDOUT <==\nHello, World!\n");
    }
}
