use crate::markup::CommandBlock;

/// The reserved command that ends a run. Its presence in a response
/// wins over every other command in the same response, and it ends
/// only the run, never the process.
pub const COMPLETION_COMMAND: &str = "end";

/// The optional report field of the completion command.
pub const REPORT_FIELD: &str = "report";

/// Extracts the report from a parsed completion block, if one was
/// given.
pub fn completion_report(block: &CommandBlock) -> Option<String> {
    block
        .field(REPORT_FIELD)
        .filter(|report| !report.is_empty())
        .map(str::to_owned)
}
