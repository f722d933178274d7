//! Config module.
//!
//! This module contains everything related to the configuration of
//! the mail client.

pub mod credentials;
pub use credentials::{Credentials, CredentialsOverrides, CredentialsSource};
