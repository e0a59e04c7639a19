use thiserror::Error;

/// Run-level errors surfaced by the pipeline entrypoint. Seam-specific
/// failures (fetch, download, delivery) carry their own error types and are
/// handled where they occur; whatever propagates this far is wrapped as-is.
#[derive(Error, Debug)]
pub enum NoticeWireError {
    #[error("Run lock conflict: another pipeline run is in progress")]
    RunLockHeld,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
