//! Single-line rendering for audit records and log fields.

/// Collapse all whitespace runs to one space and cap at `max_chars`, appending
/// `...` when text was cut.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
