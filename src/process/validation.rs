/*!
 * Command Validation
 * Rejects commands and arguments that could escape the intended executable
 */

use crate::core::errors::{LifecycleError, LifecycleResult};

const SHELL_METACHARACTERS: [char; 10] = [';', '|', '&', '\n', '\r', '\0', '`', '$', '(', ')'];
const ENCODED_METACHARACTERS: [&str; 5] = ["%3b", "%7c", "%26", "%24", "%60"];

pub(super) fn validate_command(command: &str) -> LifecycleResult<()> {
    if command.trim().is_empty() {
        return Err(LifecycleError::ValidationFailure(
            "command cannot be empty".to_string(),
        ));
    }

    if command.contains("..") {
        return Err(LifecycleError::ValidationFailure(format!(
            "command '{}' contains path traversal",
            command
        )));
    }

    check_metacharacters("command", command)
}

pub(super) fn validate_argument(arg: &str) -> LifecycleResult<()> {
    if arg.contains('\0') {
        return Err(LifecycleError::ValidationFailure(
            "argument contains a null byte".to_string(),
        ));
    }
    let lower = arg.to_lowercase();
    if lower.contains("%2e%2e") || lower.contains("..%2f") || lower.contains("%252e") {
        return Err(LifecycleError::ValidationFailure(format!(
            "argument '{}' contains encoded path traversal",
            arg
        )));
    }
    Ok(())
}

fn check_metacharacters(what: &str, value: &str) -> LifecycleResult<()> {
    if SHELL_METACHARACTERS.iter().any(|&c| value.contains(c)) {
        return Err(LifecycleError::ValidationFailure(format!(
            "{} contains shell metacharacters",
            what
        )));
    }

    let lower = value.to_lowercase();
    if ENCODED_METACHARACTERS.iter().any(|p| lower.contains(p)) {
        return Err(LifecycleError::ValidationFailure(format!(
            "{} contains encoded shell metacharacters",
            what
        )));
    }
    Ok(())
}
