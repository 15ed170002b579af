//! The channel contract consumed by the dispatcher.

use std::future::Future;

use crate::{Batch, Response, Result};

/// A bidirectional session channel.
///
/// Delivers batches of calls and accepts the responses for each batch.
/// `send` is called exactly once per batch returned by `receive`.
pub trait Channel: Send {
    /// Wait for the next batch. `Ok(None)` means the session is closed.
    fn receive(&mut self) -> impl Future<Output = Result<Option<Batch>>> + Send;

    /// Deliver all responses for one batch.
    fn send(&mut self, responses: Vec<Response>) -> impl Future<Output = Result<()>> + Send;
}
