//! Wire codecs for the backends the probes speak to.

pub mod fast;
pub mod jute;
pub mod resp;

pub use fast::{FastCodec, FastMessage, FastStatus};
pub use resp::{Command, RespCodec, RespValue};
