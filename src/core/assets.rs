//! Embedded constitution assets.
//!
//! The canonical safety section and the default phrase list are baked into the
//! binary so the validator never touches the filesystem on the request path.

/// Canonical safety section: header line followed by the exact body.
pub const EMBEDDED_SAFETY_SECTION: &str = include_str!("../../constitution/SAFETY.md");

/// Default contents of the operator-editable constitutional phrases file.
pub const EMBEDDED_DEFAULT_PHRASES: &str = include_str!("../../constitution/PHRASES.txt");

/// The header line that marks the safety section (e.g. `## Safety`).
pub fn safety_header() -> &'static str {
    EMBEDDED_SAFETY_SECTION
        .lines()
        .next()
        .unwrap_or_default()
        .trim_end()
}

/// The exact body text that must follow the header, without trailing newline.
pub fn safety_body() -> &'static str {
    let header_len = EMBEDDED_SAFETY_SECTION
        .find('\n')
        .map(|i| i + 1)
        .unwrap_or(EMBEDDED_SAFETY_SECTION.len());
    EMBEDDED_SAFETY_SECTION[header_len..].trim_end()
}

/// The full canonical section as it should appear in a resolved prompt.
pub fn canonical_safety_section() -> String {
    format!("{}\n{}", safety_header(), safety_body())
}
