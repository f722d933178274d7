//! Rust library for sending emails over an authenticated SMTP session
//! secured with implicit TLS.
//!
//! The [`MailClient`] merges its [`Credentials`] from a JSON file, a
//! JSON mapping and explicit overrides, owns the SMTP session and
//! throttles outgoing emails.

pub mod config;
pub use config::*;

pub mod email;
pub use email::*;

pub mod sender;
pub use sender::*;
