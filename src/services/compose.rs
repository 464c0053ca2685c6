//! Final assembly of a multipart session, and abort handling.

use crate::{
    errors::{OssError, OssResult},
    models::multipart::{MultipartSession, SessionStatus},
    services::orchestrator::MultipartTarget,
};
use tracing::{debug, warn};

/// How a provider turns uploaded parts into one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteStrategy {
    /// The provider assembles parts of a native multipart session.
    NativeMultipart,
    /// Parts are ordinary objects; compose them server-side, then delete them.
    ComposeAndCleanup,
}

/// Assemble the session's object under its final key.
///
/// Every planned part must carry a token. A failed assembly aborts the session
/// and surfaces as [`OssError::Compose`]. Cleanup failures after a successful
/// compose are logged and do not fail the upload.
pub async fn finalize<T>(target: &T, session: &mut MultipartSession) -> OssResult<()>
where
    T: MultipartTarget + ?Sized,
{
    let missing = session.missing_parts();
    if !missing.is_empty() {
        abort_session(target, session).await;
        return Err(OssError::Compose {
            key: session.key.to_string(),
            source: Box::new(OssError::InvalidInput(format!(
                "parts {missing:?} have no completion token"
            ))),
        });
    }

    session.status = SessionStatus::Composing;
    if let Err(err) = target.complete(session).await {
        abort_session(target, session).await;
        return Err(OssError::Compose {
            key: session.key.to_string(),
            source: Box::new(err),
        });
    }
    session.status = SessionStatus::Completed;

    if target.strategy() == CompleteStrategy::ComposeAndCleanup {
        if let Err(err) = target.cleanup(session).await {
            warn!(
                key = %session.key,
                parts = session.parts.len(),
                error = %err,
                "object composed but temporary parts were not removed"
            );
        }
    }
    Ok(())
}

/// Mark the session aborted and release provider-side state, best effort.
pub async fn abort_session<T>(target: &T, session: &mut MultipartSession)
where
    T: MultipartTarget + ?Sized,
{
    session.status = SessionStatus::Aborted;
    match target.abort(session).await {
        Ok(()) => debug!(key = %session.key, "multipart session aborted"),
        Err(err) => warn!(
            key = %session.key,
            error = %err,
            "failed to release multipart session"
        ),
    }
}
