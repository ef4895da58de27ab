use std::fmt;

/// The error kinds the control plane needs to branch on.
///
/// Most call sites still propagate plain `anyhow::Error`; this enum exists
/// for the handful of call sites that need to branch
/// on *which* kind of failure occurred (a reconciler deciding create vs.
/// update, a transfer deciding whether to retry or abort).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowdyError {
    /// Non-auth 5xx, connection reset, DNS failure. Caller should retry with backoff.
    #[error("transient HTTP failure: {0}")]
    TransientHttp(String),

    /// 401 with a parseable `WWW-Authenticate` header; handled transparently by the auth broker.
    #[error("authentication challenge: {0}")]
    AuthChallenge(String),

    /// 401/403 that survived a token refresh, or a 403 from a cloud API.
    #[error("fatal authentication failure: {0}")]
    AuthFatal(String),

    /// 404 on a read. Selects the "create" branch in a reconciler, or "proceed to upload"
    /// in an existence probe.
    #[error("not found: {0}")]
    NotFound(String),

    /// Index/manifest schemaVersion or mediaType unsupported, or missing `docker-content-digest`.
    #[error("unsupported schema: {0}")]
    SchemaUnsupported(String),

    /// The requested platform is absent from a collected index.
    #[error("platform missing from index: {0}")]
    PlatformMissing(String),

    /// At least one upload item failed; the transfer still produced a result.
    #[error("partial transfer: {0}")]
    PartialTransfer(String),

    /// A reconciler step exhausted its retries.
    #[error("convergence failed: {0}")]
    ConvergenceFailure(String),
}

impl RowdyError {
    /// True when this kind represents a condition a bounded-retry envelope should keep
    /// retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RowdyError::TransientHttp(_))
    }

    /// True when this kind must abort the current reconciler step or transfer immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RowdyError::AuthFatal(_) | RowdyError::SchemaUnsupported(_) | RowdyError::PlatformMissing(_)
        )
    }
}

/// Classify an HTTP status code the way every reconciler and registry call in this
/// repository does: 404 selects "not found", 401/403 are fatal, other failing codes
/// are transient and worth retrying. `context` is folded into the error message only.
pub fn classify_http_status(status: u16, context: impl fmt::Display) -> Option<RowdyError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(RowdyError::AuthFatal(format!(
            "{context}: status {status}"
        ))),
        404 => Some(RowdyError::NotFound(format!("{context}: status {status}"))),
        _ => Some(RowdyError::TransientHttp(format!(
            "{context}: status {status}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_statuses() {
        assert_eq!(classify_http_status(200, "ok"), None);
        assert!(matches!(
            classify_http_status(404, "x"),
            Some(RowdyError::NotFound(_))
        ));
        assert!(matches!(
            classify_http_status(401, "x"),
            Some(RowdyError::AuthFatal(_))
        ));
        assert!(matches!(
            classify_http_status(403, "x"),
            Some(RowdyError::AuthFatal(_))
        ));
        assert!(matches!(
            classify_http_status(503, "x"),
            Some(RowdyError::TransientHttp(_))
        ));
    }

    #[test]
    fn retryable_and_fatal_are_disjoint() {
        for kind in [
            RowdyError::TransientHttp("x".into()),
            RowdyError::AuthChallenge("x".into()),
            RowdyError::AuthFatal("x".into()),
            RowdyError::NotFound("x".into()),
            RowdyError::SchemaUnsupported("x".into()),
            RowdyError::PlatformMissing("x".into()),
            RowdyError::PartialTransfer("x".into()),
            RowdyError::ConvergenceFailure("x".into()),
        ] {
            assert!(!(kind.is_retryable() && kind.is_fatal()));
        }
    }
}
