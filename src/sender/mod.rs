pub mod client;
pub use client::{Clock, MailClient};

pub mod session;
pub use session::{DeliveryResult, Refusal, Reply, Session};

pub mod smtp;
pub use smtp::SmtpSession;

pub mod throttle;
pub use throttle::Throttle;

pub use lettre::transport::smtp::client::TlsParameters;
