//! Model-facing tool names.
//!
//! A tool is exposed to the language model as `serverId__toolName`. Server
//! ids are restricted so that splitting on the first `__` always yields the
//! original pair, even when the tool name itself contains `__`.

use super::errors::McpError;

/// Separator between the server id and the original tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Check that a server id can take part in reversible tool names.
///
/// Allowed: ASCII letters, digits, `-` and `_`, no `__`, no trailing `_`
/// (a trailing underscore would merge with the separator).
pub fn validate_server_id(server_id: &str) -> Result<(), McpError> {
    let invalid = |reason: &str| McpError::InvalidServerId {
        server_id: server_id.to_string(),
        reason: reason.to_string(),
    };

    if server_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if let Some(c) = server_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(invalid(&format!("character '{c}' is not allowed")));
    }
    if server_id.contains(TOOL_NAME_SEPARATOR) {
        return Err(invalid(&format!(
            "must not contain the separator '{TOOL_NAME_SEPARATOR}'"
        )));
    }
    if server_id.ends_with('_') {
        return Err(invalid("must not end with '_'"));
    }
    Ok(())
}

/// Build the model-facing name for a server's tool.
pub fn prefix_tool_name(server_id: &str, tool_name: &str) -> String {
    format!("{server_id}{TOOL_NAME_SEPARATOR}{tool_name}")
}

/// Split a model-facing name into `(server_id, tool_name)`.
///
/// Returns `None` when there is no separator or either side is empty.
pub fn unprefix_tool_name(prefixed: &str) -> Option<(&str, &str)> {
    let (server_id, tool_name) = prefixed.split_once(TOOL_NAME_SEPARATOR)?;
    if server_id.is_empty() || tool_name.is_empty() {
        return None;
    }
    Some((server_id, tool_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cases = [
            ("files", "read_file"),
            ("web-search", "search"),
            ("a1", "x"),
            ("my_server", "list_dir"),
            ("_hidden", "tool"),
        ];
        for (server, tool) in cases {
            validate_server_id(server).unwrap();
            let name = prefix_tool_name(server, tool);
            assert_eq!(unprefix_tool_name(&name), Some((server, tool)));
        }
    }

    #[test]
    fn test_tool_name_containing_separator() {
        let name = prefix_tool_name("files", "batch__read");
        assert_eq!(name, "files__batch__read");
        assert_eq!(unprefix_tool_name(&name), Some(("files", "batch__read")));
    }

    #[test]
    fn test_tool_name_with_leading_underscore() {
        let name = prefix_tool_name("files", "_private");
        assert_eq!(unprefix_tool_name(&name), Some(("files", "_private")));
    }

    #[test]
    fn test_unprefix_rejects_malformed() {
        assert_eq!(unprefix_tool_name("read_file"), None);
        assert_eq!(unprefix_tool_name("__read_file"), None);
        assert_eq!(unprefix_tool_name("files__"), None);
        assert_eq!(unprefix_tool_name(""), None);
    }

    #[test]
    fn test_validate_server_id_rejections() {
        for bad in ["", "has__sep", "trailing_", "white space", "dots.dots", "ünï"] {
            let err = validate_server_id(bad).unwrap_err();
            assert!(
                matches!(err, McpError::InvalidServerId { .. }),
                "{bad:?} should be rejected"
            );
        }
    }
}
