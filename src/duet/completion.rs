//! Detection of the status tag an agent embeds in its free-text reply.
//!
//! The producing agent is asked to end each answer with `STATUS: [WORKING]`,
//! `STATUS: [COMPLETE]` or `STATUS: [NEED_FEEDBACK]`. This is a text convention, not a
//! protocol: a missing or garbled tag means [`SessionStatus::Working`], never an error.
//! The [`CompletionDetector`] trait lets a stricter (or looser) parser replace the default
//! [`StatusTagDetector`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress an agent reports for the shared task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Working,
    Complete,
    NeedFeedback,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Working => "WORKING",
            SessionStatus::Complete => "COMPLETE",
            SessionStatus::NeedFeedback => "NEED_FEEDBACK",
        }
    }

    /// Parses an upper-case tag body such as `"NEED_FEEDBACK"`.
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "WORKING" => Some(SessionStatus::Working),
            "COMPLETE" => Some(SessionStatus::Complete),
            "NEED_FEEDBACK" => Some(SessionStatus::NeedFeedback),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives a [`SessionStatus`] from an agent's raw output.
pub trait CompletionDetector: Send + Sync {
    /// Must be total: text without a recognisable tag maps to [`SessionStatus::Working`].
    fn detect(&self, text: &str) -> SessionStatus;
}

/// Case-insensitive scanner for `STATUS: [<TAG>]`.
///
/// Whitespace between the colon and the bracket is optional. The first well-formed tag in
/// the text wins; malformed occurrences before it are skipped.
///
/// ```
/// use duet::completion::{CompletionDetector, SessionStatus, StatusTagDetector};
///
/// let detector = StatusTagDetector;
/// assert_eq!(detector.detect("Done.\nstatus: [complete]"), SessionStatus::Complete);
/// assert_eq!(detector.detect("STATUS: [DONE]"), SessionStatus::Working);
/// assert_eq!(detector.detect("no tag here"), SessionStatus::Working);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusTagDetector;

const MARKER: &str = "STATUS:";

impl CompletionDetector for StatusTagDetector {
    fn detect(&self, text: &str) -> SessionStatus {
        // ASCII upper-casing keeps byte offsets aligned with the original text.
        let upper = text.to_ascii_uppercase();
        let mut search_from = 0;

        while let Some(found) = upper[search_from..].find(MARKER) {
            let after_marker = search_from + found + MARKER.len();
            search_from = after_marker;

            let rest = upper[after_marker..].trim_start();
            let Some(body) = rest.strip_prefix('[') else {
                continue;
            };
            let Some(end) = body.find(']') else {
                continue;
            };
            if let Some(status) = SessionStatus::from_tag(&body[..end]) {
                return status;
            }
        }

        SessionStatus::Working
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> SessionStatus {
        StatusTagDetector.detect(text)
    }

    #[test]
    fn recognises_every_tag() {
        assert_eq!(detect("STATUS: [WORKING]"), SessionStatus::Working);
        assert_eq!(detect("STATUS: [COMPLETE]"), SessionStatus::Complete);
        assert_eq!(detect("STATUS: [NEED_FEEDBACK]"), SessionStatus::NeedFeedback);
    }

    #[test]
    fn matching_is_case_insensitive_and_whitespace_tolerant() {
        assert_eq!(detect("Status:[Complete]"), SessionStatus::Complete);
        assert_eq!(detect("status:\n\t [need_feedback]"), SessionStatus::NeedFeedback);
    }

    #[test]
    fn first_well_formed_tag_wins() {
        let text = "STATUS: [COMPLETE] ... later STATUS: [WORKING]";
        assert_eq!(detect(text), SessionStatus::Complete);
    }

    #[test]
    fn malformed_tags_are_skipped() {
        assert_eq!(detect("STATUS: COMPLETE"), SessionStatus::Working);
        assert_eq!(detect("STATUS: [COMPLETE"), SessionStatus::Working);
        assert_eq!(detect("STATUS: [WORKING/COMPLETE/NEED_FEEDBACK]"), SessionStatus::Working);
        assert_eq!(
            detect("STATUS: [maybe] then STATUS: [COMPLETE]"),
            SessionStatus::Complete
        );
    }

    #[test]
    fn non_ascii_text_around_the_tag_is_fine() {
        assert_eq!(detect("Fertig ✅ - STATUS: [COMPLETE] 🎉"), SessionStatus::Complete);
    }

    #[test]
    fn empty_text_defaults_to_working() {
        assert_eq!(detect(""), SessionStatus::Working);
    }

    #[test]
    fn status_serialises_as_upper_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::NeedFeedback).unwrap(),
            "\"NEED_FEEDBACK\""
        );
    }
}
