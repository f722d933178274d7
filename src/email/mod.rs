//! Email module.
//!
//! This module contains everything related to the emails sent by the
//! mail client.

pub mod message;
pub use message::{MessageRequest, SendableEmail};
