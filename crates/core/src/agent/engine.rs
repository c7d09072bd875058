//! The turn loop: request, extract, dispatch, continue or terminate.

use std::sync::Arc;

use parley_model::ModelRequest;

use super::{AgentId, AgentInner, RunError, RunEvent, RunOutcome};
use crate::markup::{self, CommandBlock, MalformedCommand};
use crate::tool::{self, ToolCall};

impl AgentInner {
    /// Drives one run: turns keep going until the model stops calling
    /// tools, issues the completion command, or the turn budget runs
    /// out. `depth` is zero for a top-level run and grows with every
    /// routed hop.
    pub(crate) async fn run_loop(
        &mut self,
        id: &AgentId,
        name: &str,
        input: String,
        depth: usize,
    ) -> Result<RunOutcome, RunError> {
        self.conversation.push_user(input);

        for turn in 0..self.max_turns {
            debug!(agent = name, turn, depth, "requesting a completion");
            let request = ModelRequest {
                messages: self.conversation.to_messages(),
            };
            let response = {
                let sink = self.sink.clone();
                self.model_client
                    .send_request(request, move |fragment| {
                        if let Some(sink) = &sink {
                            sink(RunEvent::Fragment(fragment));
                        }
                    })
                    .await
                    .map_err(RunError::Provider)?
            };
            if let Some(usage) = response.usage {
                self.emit(RunEvent::Usage(usage));
            }
            let full_text = response.text;

            // Store the assistant turn with tag blocks removed, so the
            // replayed history cannot re-trigger the same commands.
            self.conversation
                .push_assistant(markup::remove_blocks(&full_text));

            let cleaned = markup::strip_presentational(&full_text);
            let parsed = markup::extract(&cleaned);

            // The completion command wins over everything else in the
            // same response, executed or not.
            let end_tag = format!("<{}>", tool::COMPLETION_COMMAND);
            if full_text.contains(&end_tag) {
                let report = parsed
                    .iter()
                    .filter_map(|block| block.as_ref().ok())
                    .find(|block| block.name() == tool::COMPLETION_COMMAND)
                    .and_then(tool::completion_report);
                self.emit(RunEvent::Completed(report.clone()));
                return Ok(RunOutcome::Completed(report));
            }

            if parsed.is_empty() {
                return Ok(RunOutcome::Finished(full_text));
            }

            let mut entries = Vec::with_capacity(parsed.len());
            for block in parsed {
                entries.push(self.dispatch(block, id, name, depth).await);
            }
            for entry in entries {
                self.conversation.push_feedback(entry);
            }
            // Continue the same run with no new user text.
        }

        warn!(agent = name, "turn budget exhausted");
        Ok(RunOutcome::BudgetExceeded)
    }

    /// Resolves and executes one command, returning the feedback entry
    /// to append. Dispatch never fails: whatever goes wrong becomes a
    /// feedback entry the model can react to.
    async fn dispatch(
        &self,
        block: Result<CommandBlock, MalformedCommand>,
        id: &AgentId,
        name: &str,
        depth: usize,
    ) -> String {
        let block = match block {
            Ok(block) => block,
            Err(err) => {
                warn!(agent = name, %err, "malformed command");
                return format!(
                    "Malformed command <{}>: {}",
                    err.command, err.reason
                );
            }
        };
        let command = block.name().to_owned();

        // Registered tools take precedence; instance-local commands
        // remain available without a registry entry.
        let tool = if let Some(registration) = self.registry.lookup(&command)
        {
            if !self.registry.check_permission(id.as_str(), &command) {
                warn!(agent = name, command, "permission denied");
                return permission_denied_entry(
                    &command,
                    &self.registry.list_permitted(id.as_str()),
                );
            }
            registration.tool()
        } else if let Some(tool) = self.local_tools.get(&command) {
            Arc::clone(tool)
        } else {
            warn!(agent = name, command, "unknown command");
            return unknown_command_entry(
                &command,
                &self.registry.suggest(id.as_str(), &command),
            );
        };

        self.emit(RunEvent::ToolInvocation(command.clone()));
        debug!(agent = name, command, "executing command");
        let call = ToolCall {
            block,
            caller_id: id.clone(),
            caller_name: name.to_owned(),
            depth,
        };
        match tool.execute(call).await {
            Ok(result) => format!("{command} results: {result}"),
            Err(err) => {
                format!("Command <{command}> failed: {}", err.reason())
            }
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }
}

fn permission_denied_entry(command: &str, permitted: &[String]) -> String {
    if permitted.is_empty() {
        format!(
            "Permission denied for <{command}>: no tools are available to you"
        )
    } else {
        format!(
            "Permission denied for <{command}>. You may use: {}",
            permitted.join(", ")
        )
    }
}

fn unknown_command_entry(command: &str, suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        format!("Unknown command <{command}>")
    } else {
        format!(
            "Unknown command <{command}>. Did you mean: {}?",
            suggestions.join(", ")
        )
    }
}
