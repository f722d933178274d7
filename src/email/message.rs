//! Message module.
//!
//! This module contains the representation of an email to send and
//! the way it is turned into raw bytes plus an SMTP envelope.

use lettre::{
    address::AddressError,
    message::{
        header::{self, HeaderName, HeaderValue, Headers},
        Mailbox, Mailboxes, MultiPart, SinglePart,
    },
    Address,
};
use log::{debug, trace};
use std::result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot parse recipients {1:?}")]
    ParseRecipientsError(#[source] AddressError, String),
    #[error("cannot build email: recipient is empty")]
    MissingRecipientsError,
}

pub type Result<T> = result::Result<T, Error>;

/// Represents an email the user wants to send.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct MessageRequest {
    pub subject: String,
    /// Represents the recipient, either a single address or a comma
    /// separated list of addresses.
    pub to: String,
    pub text: String,
    pub html: Option<String>,
    /// Overrides the sender of the credentials.
    pub sender: Option<String>,
    /// Overrides the minimum pause of the credentials.
    pub minpause: Option<i64>,
}

impl MessageRequest {
    pub fn new<S, T, U>(subject: S, to: T, text: U) -> Self
    where
        S: ToString,
        T: ToString,
        U: ToString,
    {
        Self {
            subject: subject.to_string(),
            to: to.to_string(),
            text: text.to_string(),
            ..Self::default()
        }
    }

    /// Turns the email into a multipart/alternative one.
    pub fn html<S: ToString>(mut self, html: S) -> Self {
        self.html = Some(html.to_string());
        self
    }

    pub fn sender<S: ToString>(mut self, sender: S) -> Self {
        self.sender = Some(sender.to_string());
        self
    }

    pub fn minpause(mut self, minpause: i64) -> Self {
        self.minpause = Some(minpause);
        self
    }
}

/// Represents an email ready to be sent: the SMTP envelope and the
/// RFC 5322 formatted message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SendableEmail {
    /// Represents the reverse-path. [`None`] stands for the null
    /// reverse-path `<>`.
    pub from: Option<Address>,
    pub to: Vec<Address>,
    raw: Vec<u8>,
}

impl SendableEmail {
    /// Builds a single part text/plain email, or a
    /// multipart/alternative email with the text/plain part first and
    /// the text/html part second.
    ///
    /// A sender that is not a valid mailbox is written as it is in the
    /// `From` header, and the envelope gets the null reverse-path.
    pub fn build(
        subject: &str,
        sender: &str,
        to: &str,
        text: &str,
        html: Option<&str>,
    ) -> Result<Self> {
        if to.trim().is_empty() {
            return Err(Error::MissingRecipientsError);
        }

        let mboxes: Mailboxes = to
            .parse()
            .map_err(|err| Error::ParseRecipientsError(err, to.to_owned()))?;

        let mut headers = Headers::new();
        headers.set(header::Subject::from(subject.to_owned()));

        let from = match sender.parse::<Mailbox>() {
            Ok(mbox) => {
                let addr = mbox.email.clone();
                headers.set(header::From::from(Mailboxes::from(mbox)));
                Some(addr)
            }
            Err(err) => {
                debug!("sender {:?} is not a valid mailbox: {}", sender, err);
                headers.insert_raw(HeaderValue::new(
                    HeaderName::new_from_ascii_str("From"),
                    sender.to_owned(),
                ));
                None
            }
        };

        let to = mboxes.iter().map(|mbox| mbox.email.clone()).collect();
        headers.set(header::To::from(mboxes));
        headers.set(header::Date::now());
        headers.set(header::MIME_VERSION_1_0);

        let body = match html {
            None => SinglePart::plain(text.to_owned()).formatted(),
            Some(html) => {
                MultiPart::alternative_plain_html(text.to_owned(), html.to_owned()).formatted()
            }
        };

        let mut raw = headers.to_string().into_bytes();
        raw.extend(body);
        trace!("formatted email: {:?}", String::from_utf8_lossy(&raw));

        Ok(Self { from, to, raw })
    }

    pub fn formatted(&self) -> &[u8] {
        &self.raw
    }
}
