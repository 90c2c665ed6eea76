//! KDL parsing helper functions.
//!
//! Common utilities for extracting values from KDL nodes.

/// Convert a byte offset to line and column numbers (1-indexed)
pub fn offset_to_line_col(content: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in content.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn first_value<'a>(node: &'a kdl::KdlNode, name: &str) -> Option<&'a kdl::KdlValue> {
    node.children()
        .and_then(|children| children.get(name))
        .and_then(|n| n.entries().first())
        .map(|e| e.value())
}

/// Helper to get a string entry from a KDL node
pub fn get_string_entry(node: &kdl::KdlNode, name: &str) -> Option<String> {
    first_value(node, name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Helper to get an integer entry from a KDL node
pub fn get_int_entry(node: &kdl::KdlNode, name: &str) -> Option<i128> {
    first_value(node, name).and_then(|v| v.as_integer())
}

/// Helper to get a float entry, accepting integers as well
pub fn get_float_entry(node: &kdl::KdlNode, name: &str) -> Option<f64> {
    first_value(node, name).and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
}

/// Helper to get the first argument of a node as a string
pub fn get_first_arg_string(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Helper to get a non-negative integer entry that fits in `T`.
///
/// Returns an error naming the field if the value is negative or too large.
pub fn get_unsigned_entry<T>(node: &kdl::KdlNode, name: &str) -> anyhow::Result<Option<T>>
where
    T: TryFrom<i128>,
{
    match get_int_entry(node, name) {
        None => Ok(None),
        Some(value) => T::try_from(value).map(Some).map_err(|_| {
            anyhow::anyhow!(
                "'{}' in '{}' block is out of range: {}",
                name,
                node.name().value(),
                value
            )
        }),
    }
}
