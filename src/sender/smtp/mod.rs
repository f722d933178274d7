pub mod smtp;
pub use smtp::SmtpSession;
