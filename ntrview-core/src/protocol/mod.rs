//! Payload definitions carried by the transports.
//!
//! The framing layers ([`crate::codec`], [`crate::stream::fragment`])
//! only know about bytes; these modules give those bytes meaning.

pub mod hzmod;
pub mod process;
pub mod screen;

pub use hzmod::{HzMessage, ScreenMode};
pub use process::{BulkResponse, ProcessEntry, ProcessList};
pub use screen::{RemotePlayOptions, ScreenId};
