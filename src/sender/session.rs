//! Session module.
//!
//! This module contains the interface of an authenticated mail
//! session, owned by the [`MailClient`](crate::MailClient).

use lettre::transport::smtp::{
    self,
    response::{Code, Response},
};
use std::{collections::BTreeMap, result};
use thiserror::Error;

use crate::SendableEmail;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to smtp server {1}")]
    ConnectError(#[source] smtp::Error, String),
    #[error("cannot authenticate to smtp server as {1:?}")]
    AuthenticateError(#[source] smtp::Error, String),
    #[error("cannot send email: sender {1:?} refused")]
    MailFromError(#[source] smtp::Error, String),
    #[error("cannot send email: recipient {1} unreachable")]
    RcptToError(#[source] smtp::Error, String),
    #[error("cannot send email: all recipients refused {0:?}")]
    RefuseAllRecipientsError(DeliveryResult),
    #[error("cannot send email data")]
    SendDataError(#[source] smtp::Error),
    #[error("cannot quit smtp session")]
    QuitError(#[source] smtp::Error),
    #[error("cannot use smtp session: session is closed")]
    ClosedSessionError,
}

pub type Result<T> = result::Result<T, Error>;

fn status_code(code: Code) -> u16 {
    code.severity as u16 * 100 + code.category as u16 * 10 + code.detail as u16
}

/// Represents the status returned by the server.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
}

impl From<&Response> for Reply {
    fn from(response: &Response) -> Self {
        Self {
            code: status_code(response.code()),
            message: response
                .message()
                .map(|line| line.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Represents a recipient refused by the server.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Refusal {
    pub code: Option<u16>,
    pub message: String,
}

impl From<&smtp::Error> for Refusal {
    /// Keeps the server text only: the status prefix of the error,
    /// like `permanent error (550): `, is already held by `code`.
    fn from(err: &smtp::Error) -> Self {
        let code = err.status().map(status_code);
        let message = err.to_string();
        let message = match code.and(message.split_once("): ")) {
            Some((_, text)) => text.to_owned(),
            None => message,
        };
        Self { code, message }
    }
}

/// Maps refused recipient addresses to the reason of the refusal. An
/// empty result means that every recipient accepted the email.
pub type DeliveryResult = BTreeMap<String, Refusal>;

pub trait Session: Send {
    /// Authenticates the session.
    fn login(&mut self, user: &str, password: &str) -> Result<Reply>;

    /// Sends the email to its envelope recipients.
    fn send(&mut self, email: &SendableEmail) -> Result<DeliveryResult>;

    /// Terminates the session. Quitting an already closed session
    /// does nothing.
    fn quit(&mut self) -> Result<()>;
}
