use tokio_util::sync::CancellationToken;

/// A token that signals cancellation to a running loop.
///
/// Clones share the same state, cancelling any of them cancels all.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. Calling this more than once has no effect.
    #[inline]
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns `true` if the token has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Waits until the token is cancelled.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    #[inline]
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}
