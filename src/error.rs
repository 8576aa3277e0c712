/// Closed error taxonomy for the gateway core.
///
/// Every variant is fatal for the request it occurs in; no retries happen
/// at this layer. Cancellation is not represented here because it is not
/// an error: a cancelled stream simply ends.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unknown model name: the registry has no entry for it.
    #[error("model '{0}' is not configured")]
    NotConfigured(String),

    /// A configured provider is unusable before any network call is made
    /// (empty endpoint, credential env var unset).
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    /// Non-success HTTP status, network failure mid-stream, or malformed
    /// JSON on a non-blank data line. Upstream detail is logged, not
    /// carried here, so it is never echoed to the caller.
    #[error("upstream provider error: {0}")]
    UpstreamProtocol(String),

    /// Attachment download or decode failed during request translation.
    #[error("image preprocessing failed: {0}")]
    ImagePreprocessing(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
