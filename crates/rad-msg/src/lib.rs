//! The message boundary between the parent, front-end and engine services.
//!
//! Every exchange is an imsg frame (fixed header plus payload) carried over a
//! Unix stream socket; payloads are fixed-size records with explicit codecs.
//! File descriptors ride along as `SCM_RIGHTS` ancillary data.

pub mod channel;
pub mod imsg;
pub mod records;

pub use channel::ImsgChannel;
pub use imsg::{Imsg, ImsgType};
pub use records::Record;
