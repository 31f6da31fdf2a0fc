use rowparity_core::{Result, SnapshotToken};
use rowparity_introspect::{Connector, Session};

/// Open a session and, when a token is given, pin it before anything else runs.
pub(crate) async fn open_session(
    side: &'static str,
    connector: &dyn Connector,
    token: Option<SnapshotToken>,
) -> Result<Box<dyn Session>> {
    let mut session = connector.connect().await?;
    if let Some(token) = token {
        if let Err(err) = session.pin_snapshot(token).await {
            close_session(side, session).await;
            return Err(err);
        }
        tracing::debug!(event = "snapshot_pinned", side, token = %token);
    }
    Ok(session)
}

/// Close a session; a failure only matters to the logs.
pub(crate) async fn close_session(side: &'static str, mut session: Box<dyn Session>) {
    if let Err(err) = session.close().await {
        tracing::warn!(event = "session_close_failed", side, error = %err);
    }
}
