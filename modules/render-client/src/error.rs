use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The service itself already waits out the page's network idle, so a
    /// timeout here means the service is down or wedged, not a slow page.
    #[error("render request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("render service error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A 200 whose body is too small to be a rendered page. Crashed tabs and
    /// blocked navigations serialize to near-empty documents.
    #[error("rendered body implausibly small ({len} bytes)")]
    EmptyRender { len: usize },
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RenderError::Timeout
        } else {
            RenderError::Network(err.to_string())
        }
    }
}
