use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns `true` if sending the same request again may succeed.
    ///
    /// Only failures that happened before any event was delivered are
    /// worth retrying, which is up to the caller to ensure.
    #[inline]
    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::RateLimitExceeded
    }
}

/// A type that represents a model provider, which is an entry for opening
/// response streams against the LLM endpoint.
///
/// Once the provider is created, it should behave like a stateless object.
/// It can still have internal state (connection pools, for example), but
/// callers should not rely on it, and the provider should be prepared for
/// being dropped anytime.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Opens a response stream for the request.
    ///
    /// The returned future must not borrow `self` or `req`, so that callers
    /// can drive it from a spawned task.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
