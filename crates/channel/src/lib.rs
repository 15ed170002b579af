//! Session channel for switchboard.
//!
//! This crate defines what travels between the agent session and the
//! dispatcher: [`Call`]s grouped into a [`Batch`], and one [`Response`]
//! carrying an [`Outcome`] per call. It also provides the [`Channel`]
//! contract and two implementations.
//!
//! # Example
//!
//! ```no_run
//! use channel::{Channel, LineChannel, Outcome, Response};
//!
//! # async fn example() -> channel::Result<()> {
//! let mut channel = LineChannel::stdio();
//!
//! while let Some(batch) = channel.receive().await? {
//!     let responses = batch
//!         .calls
//!         .iter()
//!         .map(|call| Response::new(&call.id, &call.name, Outcome::failure("not wired")))
//!         .collect();
//!     channel.send(responses).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod line;
pub mod memory;
mod protocol;
mod transport;

pub use error::{Error, Result};
pub use line::{LineChannel, Subscription, subscribe};
pub use protocol::{
    Batch, Call, InboundFrame, MAX_FRAME_SIZE, OutboundFrame, Outcome, Response, ToolCallFrame,
    ToolResponseFrame, decode_line, encode_responses,
};
pub use transport::Channel;
