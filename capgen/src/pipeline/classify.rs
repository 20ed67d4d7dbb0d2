//! Diagnostic-signature classification for external tool failures.
//!
//! A nonzero exit is mapped into the failure taxonomy by matching the
//! captured stderr tail against known signatures. Anything unrecognized is
//! a fatal `ToolFailure`.

use std::sync::LazyLock;

use regex::RegexSet;

use crate::job::FailureKind;

static INPUT_SIGNATURES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)invalid data found when processing input",
        r"(?i)no such file or directory",
        r"(?i)unsupported (codec|format|sample)",
        r"(?i)unknown (format|decoder|encoder)",
        r"(?i)does not contain any stream",
        r"(?i)moov atom not found",
        r"(?i)invalid argument",
        r"(?i)decoder .* not found",
        r"(?i)failed to read (audio|frame|header)",
    ])
    .expect("input signature set is valid")
});

static RESOURCE_SIGNATURES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)out of memory",
        r"(?i)cannot allocate memory",
        r"(?i)resource temporarily unavailable",
        r"(?i)too many open files",
        r"(?i)no space left on device",
        r"(?i)device or resource busy",
    ])
    .expect("resource signature set is valid")
});

/// Classify a tool's diagnostics into the failure taxonomy.
///
/// Returns the kind plus whether the coordinator may retry.
pub fn classify_diagnostics(stderr: &str) -> (FailureKind, bool) {
    if RESOURCE_SIGNATURES.is_match(stderr) {
        (FailureKind::ResourceExhausted, true)
    } else if INPUT_SIGNATURES.is_match(stderr) {
        (FailureKind::InputError, false)
    } else {
        (FailureKind::ToolFailure, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_input_is_fatal() {
        let (kind, retryable) =
            classify_diagnostics("[mov] Invalid data found when processing input");
        assert_eq!(kind, FailureKind::InputError);
        assert!(!retryable);
    }

    #[test]
    fn exhaustion_is_retryable() {
        let (kind, retryable) = classify_diagnostics("malloc failed: Cannot allocate memory");
        assert_eq!(kind, FailureKind::ResourceExhausted);
        assert!(retryable);
    }

    #[test]
    fn resource_signatures_win_over_input() {
        // Both families present: transient wins so a retry gets a chance.
        let text = "out of memory while reading header: invalid argument";
        let (kind, retryable) = classify_diagnostics(text);
        assert_eq!(kind, FailureKind::ResourceExhausted);
        assert!(retryable);
    }

    #[test]
    fn unknown_diagnostics_default_to_fatal_tool_failure() {
        let (kind, retryable) = classify_diagnostics("segfault in filter graph");
        assert_eq!(kind, FailureKind::ToolFailure);
        assert!(!retryable);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let (kind, _) = classify_diagnostics("MOOV ATOM NOT FOUND");
        assert_eq!(kind, FailureKind::InputError);
    }
}
