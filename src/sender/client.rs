//! Client module.
//!
//! This module contains the mail client: it owns the merged
//! credentials, the mail session and the throttle.

use chrono::Utc;
use lettre::transport::smtp::{self, client::TlsParameters};
use log::{debug, error, info, warn};
use std::result;
use thiserror::Error;

use crate::{
    config::credentials,
    email::message,
    sender::session::{self, DeliveryResult, Reply, Session},
    Credentials, CredentialsOverrides, CredentialsSource, MessageRequest, SendableEmail,
    SmtpSession, Throttle,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to smtp server: host is not defined")]
    MissingHostError,
    #[error("cannot build tls parameters for {1}")]
    BuildTlsParamsError(#[source] smtp::Error, String),

    #[error(transparent)]
    CredentialsError(#[from] credentials::Error),
    #[error(transparent)]
    MessageError(#[from] message::Error),
    #[error(transparent)]
    SessionError(#[from] session::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Gives the current time in seconds since the Unix epoch (UTC).
pub type Clock = Box<dyn Fn() -> i64 + Send>;

/// Represents the mail client. The session is quitted when the
/// client is closed or dropped.
pub struct MailClient {
    credentials: Credentials,
    session: Box<dyn Session>,
    throttle: Throttle,
    clock: Clock,
}

impl MailClient {
    /// Standard port of SMTP over implicit TLS.
    pub const DEFAULT_PORT: u16 = 465;
    /// Sender used when neither the email nor the credentials define
    /// one.
    pub const UNKNOWN_SENDER: &'static str = "(unknown sender)";

    /// Merges the credentials then connects to the SMTP server. When
    /// no TLS parameters are given, the server certificate is
    /// verified against the system trust store.
    pub fn connect(
        source: CredentialsSource,
        overrides: CredentialsOverrides,
        tls: Option<TlsParameters>,
    ) -> Result<Self> {
        let credentials = Credentials::merge(source, overrides)?;
        Self::from_credentials(credentials, tls)
    }

    pub fn from_credentials(credentials: Credentials, tls: Option<TlsParameters>) -> Result<Self> {
        let host = credentials
            .host
            .clone()
            .ok_or(Error::MissingHostError)?;

        let tls = match tls {
            Some(tls) => tls,
            None => TlsParameters::new(host.clone())
                .map_err(|err| Error::BuildTlsParamsError(err, host.clone()))?,
        };

        let session = SmtpSession::connect(&host, credentials.port, &tls)?;
        Ok(Self::with_session(credentials, session))
    }

    /// Builds a client on top of an already opened session.
    pub fn with_session<S: Session + 'static>(credentials: Credentials, session: S) -> Self {
        Self {
            credentials,
            session: Box::new(session),
            throttle: Throttle::default(),
            clock: Box::new(|| Utc::now().timestamp()),
        }
    }

    /// Replaces the clock used to throttle emails.
    pub fn with_clock<C: Fn() -> i64 + Send + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Authenticates the session. Missing user or password fall back
    /// to the credentials, then to an empty string.
    pub fn login(&mut self, user: Option<&str>, password: Option<&str>) -> Result<Reply> {
        let user = match user.or(self.credentials.user.as_deref()) {
            Some(user) => user.to_owned(),
            None => {
                warn!("user neither given nor found in credentials, using empty string");
                String::new()
            }
        };

        let password = match password.or(self.credentials.password.as_deref()) {
            Some(password) => password.to_owned(),
            None => {
                warn!("password neither given nor found in credentials, using empty string");
                String::new()
            }
        };

        info!("logging in as {:?}", user);
        Ok(self.session.login(&user, &password)?)
    }

    /// Sends the email, unless the minimum pause since the previous
    /// email is not over. In that case nothing is sent and the
    /// delivery result is empty.
    ///
    /// On failure the session is quitted before the error is
    /// returned.
    pub fn send(&mut self, req: &MessageRequest) -> Result<DeliveryResult> {
        let minpause = req.minpause.or(self.credentials.minpause);

        let sender = match req.sender.as_deref().or(self.credentials.sender.as_deref()) {
            Some(sender) => sender.to_owned(),
            None => {
                warn!("sender neither given nor found in credentials");
                Self::UNKNOWN_SENDER.to_owned()
            }
        };

        let now = (self.clock)();
        if let Some(minpause) = minpause {
            if let Err(elapsed) = self.throttle.check(now, minpause) {
                warn!(
                    "minpause of {}s prevents email from being sent, time since last email: {}s",
                    minpause, elapsed
                );
                return Ok(DeliveryResult::new());
            }
        }
        self.throttle.record(now);

        match self.transmit(req, &sender) {
            Ok(res) => Ok(res),
            Err(err) => {
                if let Err(quit_err) = self.session.quit() {
                    warn!("cannot quit smtp session: {}", quit_err);
                }
                error!("cannot send email {:?}: {}", req.subject, err);
                debug!("{:?}", err);
                Err(err)
            }
        }
    }

    fn transmit(&mut self, req: &MessageRequest, sender: &str) -> Result<DeliveryResult> {
        let email =
            SendableEmail::build(&req.subject, sender, &req.to, &req.text, req.html.as_deref())?;
        let res = self.session.send(&email)?;
        info!("email {:?} sent to {}", req.subject, req.to);
        Ok(res)
    }

    /// Quits the session.
    pub fn close(mut self) -> Result<()> {
        Ok(self.session.quit()?)
    }
}

impl Drop for MailClient {
    fn drop(&mut self) {
        if let Err(err) = self.session.quit() {
            debug!("cannot quit smtp session: {}", err);
        }
    }
}
