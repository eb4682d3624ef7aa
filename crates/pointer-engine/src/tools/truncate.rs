pub const DEFAULT_MAX_OUTPUT: usize = 256 * 1024;

/// Truncate tool output if it exceeds `max_bytes`, at a char boundary,
/// appending a marker with the original and kept sizes.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limit_unchanged() {
        assert_eq!(truncate_output("hello world", 1024), "hello world");
        assert_eq!(truncate_output("", 100), "");
        let exact = "a".repeat(100);
        assert_eq!(truncate_output(&exact, 100), exact);
    }

    #[test]
    fn over_limit_marked() {
        let input = "a".repeat(101);
        let result = truncate_output(&input, 100);
        assert!(result.contains("[truncated: 101 bytes -> 100 bytes]"));
        assert!(result.starts_with("aaaa"));
    }

    #[test]
    fn cuts_on_char_boundary() {
        let input = "é".repeat(10); // 2 bytes each
        let result = truncate_output(&input, 5);
        assert!(result.starts_with("éé\n"));
        assert!(result.contains("-> 4 bytes]"));
    }
}
