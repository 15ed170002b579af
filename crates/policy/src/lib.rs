//! Query safety policy.
//!
//! Every query is checked before it reaches a connection. The rules are
//! literal: forbidden keywords are matched as case-insensitive
//! substrings of the whole query text, so an identifier such as `dropout`
//! is rejected too.

mod error;
mod operation;
mod policy;

pub use error::{Error, Result};
pub use operation::Operation;
pub use policy::{Decision, QueryPolicy};
