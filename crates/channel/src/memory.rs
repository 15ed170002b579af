//! In-process channel, used for embedding and tests.

use tokio::sync::mpsc;

use crate::{Batch, Channel, Error, Response, Result};

/// Dispatcher side of an in-memory channel.
pub struct MemoryChannel {
    inbound: mpsc::UnboundedReceiver<Batch>,
    outbound: mpsc::UnboundedSender<Vec<Response>>,
}

/// Session side: pushes batches, observes responses.
pub struct MemoryPeer {
    pub calls: mpsc::UnboundedSender<Batch>,
    pub responses: mpsc::UnboundedReceiver<Vec<Response>>,
}

/// Create a connected channel/peer pair.
pub fn pair() -> (MemoryChannel, MemoryPeer) {
    let (calls, inbound) = mpsc::unbounded_channel();
    let (outbound, responses) = mpsc::unbounded_channel();
    (
        MemoryChannel { inbound, outbound },
        MemoryPeer { calls, responses },
    )
}

impl Channel for MemoryChannel {
    async fn receive(&mut self) -> Result<Option<Batch>> {
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, responses: Vec<Response>) -> Result<()> {
        self.outbound.send(responses).map_err(|_| Error::Closed)
    }
}
