//! Error classification policy.
//!
//! Maps any [`ArchiveError`] to Transient or Permanent, and derives the
//! operator-facing message, action hint, and (for permanent failures) a
//! stable short code. Unknown errors classify Permanent so a bad input can
//! never cause a retry storm.

use std::io::ErrorKind;
use std::time::Duration;

use arkiv_config::scrub_secrets_in_text;

use crate::error::{ArchiveError, Classification};
use crate::signing::SigningError;
use crate::zammad::UpstreamError;

const MAX_MESSAGE_LEN: usize = 500;

pub fn classify(err: &ArchiveError) -> Classification {
    match err {
        ArchiveError::Upstream(upstream) => classify_upstream(upstream),
        ArchiveError::Io(io) => classify_io(io),
        ArchiveError::Signing(signing) => classify_signing(signing),
        // Infrastructure hiccups on the queue/lock side can resolve on
        // their own.
        ArchiveError::Redis(_) => Classification::Transient,
        // Validation and rendering failures will not change on replay.
        ArchiveError::PathPolicy(_) | ArchiveError::Validation(_) | ArchiveError::Render(_) => {
            Classification::Permanent
        }
        ArchiveError::Cancelled => Classification::Transient,
    }
}

fn classify_upstream(err: &UpstreamError) -> Classification {
    match err {
        UpstreamError::Server { .. }
        | UpstreamError::RateLimit { .. }
        | UpstreamError::Timeout { .. }
        | UpstreamError::Network { .. } => Classification::Transient,
        UpstreamError::Auth { .. }
        | UpstreamError::NotFound { .. }
        | UpstreamError::Client { .. } => Classification::Permanent,
    }
}

/// OS error policy. Temporary network-share flakiness and fixable
/// environment problems (missing mount, full disk) stay retryable; policy
/// and permission problems do not.
pub fn classify_io(err: &std::io::Error) -> Classification {
    match err.kind() {
        ErrorKind::TimedOut
        | ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::NetworkDown
        | ErrorKind::NetworkUnreachable
        | ErrorKind::HostUnreachable
        | ErrorKind::StaleNetworkFileHandle
        | ErrorKind::NotFound
        | ErrorKind::StorageFull
        | ErrorKind::QuotaExceeded
        | ErrorKind::ReadOnlyFilesystem
        | ErrorKind::ResourceBusy
        | ErrorKind::UnexpectedEof => Classification::Transient,
        ErrorKind::PermissionDenied
        | ErrorKind::InvalidInput
        | ErrorKind::InvalidData
        | ErrorKind::InvalidFilename
        | ErrorKind::NotADirectory
        | ErrorKind::IsADirectory
        | ErrorKind::DirectoryNotEmpty
        | ErrorKind::AlreadyExists => Classification::Permanent,
        _ => Classification::Permanent,
    }
}

fn classify_signing(err: &SigningError) -> Classification {
    match err {
        SigningError::TsaUnreachable(_) | SigningError::TsaServer { .. } => {
            Classification::Transient
        }
        SigningError::SignerFailed { transient: true, .. } => Classification::Transient,
        _ => Classification::Permanent,
    }
}

/// Delay override for the next retry, when the upstream told us one.
pub fn retry_after(err: &ArchiveError) -> Option<Duration> {
    match err {
        ArchiveError::Upstream(UpstreamError::RateLimit { retry_after, .. }) => *retry_after,
        _ => None,
    }
}

/// Bounded, secret-scrubbed message for notes, history, and DLQ entries.
pub fn concise_message(err: &ArchiveError) -> String {
    let text = scrub_secrets_in_text(err.to_string().trim());
    if text.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    } else {
        text
    }
}

/// One-line operator instruction attached to every error note.
pub fn action_hint(err: &ArchiveError, classification: Classification) -> String {
    if classification == Classification::Transient {
        return "Transient failure. Verify Zammad/TSA reachability and storage availability; \
                the ticket keeps the trigger tag so a retry can be triggered by saving the \
                ticket or reapplying the macro."
            .to_string();
    }

    match err {
        ArchiveError::Upstream(UpstreamError::Auth { .. }) => {
            "Fix Zammad API token/permissions (HTTP 401/403), then reapply the trigger tag."
                .to_string()
        }
        ArchiveError::Upstream(UpstreamError::NotFound { .. }) => {
            "Ticket/resource not found in Zammad. Verify the ticket still exists, then reapply \
             the trigger tag."
                .to_string()
        }
        ArchiveError::Upstream(_) => {
            "Upstream Zammad error was treated as permanent by policy. If the issue is resolved, \
             reapply the trigger tag to reprocess."
                .to_string()
        }
        ArchiveError::Io(io) if io.kind() == ErrorKind::PermissionDenied => {
            "Storage permission denied. Check network share mount options, ownership, and ACLs, \
             then reapply the trigger tag."
                .to_string()
        }
        ArchiveError::Signing(_) => {
            "Fix the signing material/TSA configuration, then reapply the trigger tag."
                .to_string()
        }
        ArchiveError::PathPolicy(_) | ArchiveError::Validation(_) => {
            "Fix ticket fields / path policy validation, then reapply the trigger tag (and \
             optionally remove the error tag for clarity)."
                .to_string()
        }
        _ => "Non-retryable failure by policy. Fix the underlying issue and reapply the trigger \
              tag (and optionally remove the error tag)."
            .to_string(),
    }
}

/// Stable short code plus hint for permanent failures, derived from the
/// message pattern so operators and dashboards can match on it.
pub fn permanent_code_and_hint(err: &ArchiveError) -> (&'static str, &'static str) {
    let msg = err.to_string().to_ascii_lowercase();

    if msg.contains("archive_path is missing")
        || (msg.contains("archive_path") && msg.contains("missing"))
    {
        return (
            "missing_archive_path",
            "Set custom_fields.archive_path on the ticket.",
        );
    }
    if msg.contains("archive_path must not be empty") || msg.contains("all segments were empty") {
        return (
            "empty_archive_path",
            "Set archive_path to at least one non-empty segment.",
        );
    }
    if msg.contains("archive_path must be a string") || msg.contains("archive_path[") {
        return (
            "invalid_archive_path",
            "Use a string or list of strings for archive_path.",
        );
    }
    if msg.contains("allow_prefixes") && msg.contains("not allowed") {
        return (
            "path_not_allowed",
            "Check allow_prefixes; archive_path must match a prefix.",
        );
    }
    if msg.contains("owner.login") || msg.contains("updated_by.login") {
        return (
            "missing_user_login",
            "Ensure ticket has owner/updated_by with login.",
        );
    }
    if msg.contains("archive_user") {
        return (
            "missing_archive_user",
            "Set custom_fields.archive_user for fixed mode.",
        );
    }
    if msg.contains("filename")
        && (msg.contains("pattern") || msg.contains("segment") || msg.contains("must not"))
    {
        return (
            "invalid_filename",
            "Check filename_pattern and path policy (no ., .., separators).",
        );
    }
    if msg.contains("path segment") || msg.contains("path separators") || msg.contains("dot segments")
    {
        return (
            "path_validation",
            "Check archive_path segments (no ., .., empty, or separators).",
        );
    }
    ("permanent_error", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_5xx_is_transient() {
        let err = ArchiveError::Upstream(UpstreamError::Server {
            status: Some(503),
            message: "Zammad server error (status=503)".into(),
        });
        assert_eq!(classify(&err), Classification::Transient);
    }

    #[test]
    fn upstream_auth_is_permanent() {
        let err = ArchiveError::Upstream(UpstreamError::Auth {
            status: 401,
            url: "https://zammad.example/api/v1/tickets/1".into(),
        });
        assert_eq!(classify(&err), Classification::Permanent);
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = ArchiveError::Upstream(UpstreamError::RateLimit {
            retry_after: Some(Duration::from_secs(7)),
        });
        assert_eq!(classify(&err), Classification::Transient);
        assert_eq!(retry_after(&err), Some(Duration::from_secs(7)));
    }

    #[test]
    fn io_policy_table() {
        let transient = [
            ErrorKind::TimedOut,
            ErrorKind::ConnectionReset,
            ErrorKind::BrokenPipe,
            ErrorKind::NotFound,
            ErrorKind::StorageFull,
            ErrorKind::NetworkUnreachable,
        ];
        for kind in transient {
            let err = ArchiveError::Io(std::io::Error::new(kind, "boom"));
            assert_eq!(classify(&err), Classification::Transient, "{kind:?}");
        }

        let permanent = [
            ErrorKind::PermissionDenied,
            ErrorKind::InvalidInput,
            ErrorKind::NotADirectory,
            ErrorKind::IsADirectory,
        ];
        for kind in permanent {
            let err = ArchiveError::Io(std::io::Error::new(kind, "boom"));
            assert_eq!(classify(&err), Classification::Permanent, "{kind:?}");
        }
    }

    #[test]
    fn validation_is_permanent_with_code() {
        let err = ArchiveError::validation("custom_fields.archive_path is missing");
        assert_eq!(classify(&err), Classification::Permanent);
        let (code, _) = permanent_code_and_hint(&err);
        assert_eq!(code, "missing_archive_path");
    }

    #[test]
    fn dot_segment_maps_to_path_validation() {
        let err = ArchiveError::validation("dot segments are not allowed");
        let (code, _) = permanent_code_and_hint(&err);
        assert_eq!(code, "path_validation");
    }

    #[test]
    fn unknown_errors_fail_safe_permanent() {
        let err = ArchiveError::validation("something nobody anticipated");
        assert_eq!(classify(&err), Classification::Permanent);
        let (code, hint) = permanent_code_and_hint(&err);
        assert_eq!(code, "permanent_error");
        assert!(hint.is_empty());
    }

    #[test]
    fn concise_message_is_bounded_and_scrubbed() {
        let err = ArchiveError::validation(format!(
            "upstream rejected call with password=supersecret {}",
            "x".repeat(600)
        ));
        let msg = concise_message(&err);
        assert!(msg.len() <= 500);
        assert!(!msg.contains("supersecret"));
    }
}
