//! SMTP module.
//!
//! This module contains the SMTP implementation of the mail session,
//! over an implicit TLS connection.

use lettre::transport::smtp::{
    authentication::{Credentials as SmtpCredentials, Mechanism},
    client::{SmtpConnection, TlsParameters},
    commands::{Data, Mail, Rcpt, Rset},
    extension::ClientId,
};
use log::{debug, info, trace, warn};
use std::time::Duration;

use crate::{
    sender::session::{DeliveryResult, Error, Refusal, Reply, Result, Session},
    SendableEmail,
};

/// Represents an SMTP session over an implicit TLS connection.
pub struct SmtpSession {
    conn: Option<SmtpConnection>,
}

impl SmtpSession {
    /// Timeout applied to every network operation of the session.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Opens the TLS connection and greets the server.
    pub fn connect(host: &str, port: u16, tls: &TlsParameters) -> Result<Self> {
        info!("connecting to smtp server {}:{}", host, port);

        let conn = SmtpConnection::connect(
            (host, port),
            Some(Self::DEFAULT_TIMEOUT),
            &ClientId::default(),
            Some(tls),
            None,
        )
        .map_err(|err| Error::ConnectError(err, format!("{}:{}", host, port)))?;
        trace!("smtp server info: {}", conn.server_info());

        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut SmtpConnection> {
        self.conn.as_mut().ok_or(Error::ClosedSessionError)
    }
}

impl Session for SmtpSession {
    fn login(&mut self, user: &str, password: &str) -> Result<Reply> {
        let credentials = SmtpCredentials::new(user.to_owned(), password.to_owned());
        let response = self
            .conn()?
            .auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
            .map_err(|err| Error::AuthenticateError(err, user.to_owned()))?;

        let reply = Reply::from(&response);
        debug!("logged in as {:?}: {} {}", user, reply.code, reply.message);
        Ok(reply)
    }

    fn send(&mut self, email: &SendableEmail) -> Result<DeliveryResult> {
        let conn = self.conn()?;
        let sender = email
            .from
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        conn.command(Mail::new(email.from.clone(), vec![]))
            .map_err(|err| Error::MailFromError(err, sender))?;

        let mut refused = DeliveryResult::new();
        for rcpt in &email.to {
            if let Err(err) = conn.command(Rcpt::new(rcpt.clone(), vec![])) {
                if err.status().is_none() {
                    return Err(Error::RcptToError(err, rcpt.to_string()));
                }
                warn!("recipient {} refused: {}", rcpt, err);
                refused.insert(rcpt.to_string(), Refusal::from(&err));
            }
        }

        if refused.len() == email.to.len() {
            if let Err(err) = conn.command(Rset) {
                debug!("cannot reset smtp transaction: {}", err);
            }
            return Err(Error::RefuseAllRecipientsError(refused));
        }

        conn.command(Data).map_err(Error::SendDataError)?;
        let response = conn
            .message(email.formatted())
            .map_err(Error::SendDataError)?;
        debug!("email sent: {}", Reply::from(&response).message);

        Ok(refused)
    }

    fn quit(&mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            debug!("quitting smtp session");
            conn.quit().map_err(Error::QuitError)?;
        }
        Ok(())
    }
}

impl Drop for SmtpSession {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Write},
        net::{SocketAddr, TcpListener},
        thread::{self, JoinHandle},
    };

    use super::*;

    /// Serves a single plain SMTP connection. The server accepts every
    /// command except `MAIL FROM`, answered with `mail_from_reply`, and
    /// `RCPT TO` for the `refused` addresses. Received commands are
    /// returned once the client quits.
    fn serve(
        mail_from_reply: &'static str,
        refused: &'static [&'static str],
    ) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut cmds = Vec::new();
            let mut line = String::new();

            stream.write_all(b"220 localhost ESMTP\r\n").unwrap();

            while reader.read_line(&mut line).unwrap() > 0 {
                let cmd = line.trim_end().to_owned();
                line.clear();

                let reply = if cmd.starts_with("EHLO") {
                    "250 localhost\r\n"
                } else if cmd.starts_with("MAIL FROM") {
                    mail_from_reply
                } else if cmd.starts_with("RCPT TO") {
                    if refused.iter().any(|addr| cmd.contains(addr)) {
                        "550 5.1.1 no such user\r\n"
                    } else {
                        "250 2.1.5 Ok\r\n"
                    }
                } else if cmd == "DATA" {
                    stream
                        .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                        .unwrap();
                    while reader.read_line(&mut line).unwrap() > 0 && line.trim_end() != "." {
                        line.clear();
                    }
                    line.clear();
                    "250 2.0.0 Ok: queued\r\n"
                } else if cmd == "RSET" {
                    "250 2.0.0 Ok\r\n"
                } else if cmd == "QUIT" {
                    "221 2.0.0 Bye\r\n"
                } else {
                    "502 5.5.2 Error: command not recognized\r\n"
                };

                stream.write_all(reply.as_bytes()).unwrap();
                let quit = cmd == "QUIT";
                cmds.push(cmd);
                if quit {
                    break;
                }
            }

            cmds
        });

        (addr, handle)
    }

    fn session(addr: SocketAddr) -> SmtpSession {
        let conn = SmtpConnection::connect(
            addr,
            Some(Duration::from_secs(5)),
            &ClientId::Domain("localhost".into()),
            None,
            None,
        )
        .unwrap();
        SmtpSession { conn: Some(conn) }
    }

    fn email(sender: &str, to: &str) -> SendableEmail {
        SendableEmail::build("subject", sender, to, "text", None).unwrap()
    }

    #[test]
    fn send_partially_refused() {
        let (addr, server) = serve("250 2.1.0 Ok\r\n", &["carol@localhost"]);
        let mut session = session(addr);

        let res = session
            .send(&email("alice@localhost", "bob@localhost, carol@localhost"))
            .unwrap();
        session.quit().unwrap();

        let mut expected = DeliveryResult::new();
        expected.insert(
            "carol@localhost".into(),
            Refusal {
                code: Some(550),
                message: "5.1.1 no such user".into(),
            },
        );
        assert_eq!(expected, res);

        let cmds = server.join().unwrap();
        assert!(cmds.contains(&"MAIL FROM:<alice@localhost>".to_owned()));
        assert!(cmds.contains(&"DATA".to_owned()));
        assert!(!cmds.contains(&"RSET".to_owned()));
    }

    #[test]
    fn send_all_refused_resets_transaction() {
        let (addr, server) = serve("250 2.1.0 Ok\r\n", &["bob@localhost", "carol@localhost"]);
        let mut session = session(addr);

        let err = session
            .send(&email("alice@localhost", "bob@localhost, carol@localhost"))
            .unwrap_err();
        session.quit().unwrap();

        match err {
            Error::RefuseAllRecipientsError(res) => {
                assert_eq!(2, res.len());
                assert_eq!(Some(550), res["bob@localhost"].code);
                assert_eq!("5.1.1 no such user", res["carol@localhost"].message);
            }
            err => panic!("unexpected error {:?}", err),
        }

        let cmds = server.join().unwrap();
        assert!(cmds.contains(&"RSET".to_owned()));
        assert!(!cmds.contains(&"DATA".to_owned()));
    }

    #[test]
    fn send_sender_refused() {
        let (addr, server) = serve("553 5.7.1 sender rejected\r\n", &[]);
        let mut session = session(addr);

        let err = session
            .send(&email("alice@localhost", "bob@localhost"))
            .unwrap_err();
        session.quit().unwrap();

        assert!(matches!(err, Error::MailFromError(_, sender) if sender == "alice@localhost"));
        let cmds = server.join().unwrap();
        assert!(!cmds.iter().any(|cmd| cmd.starts_with("RCPT TO")));
    }

    #[test]
    fn send_unknown_sender_uses_null_reverse_path() {
        let (addr, server) = serve("250 2.1.0 Ok\r\n", &[]);
        let mut session = session(addr);

        let res = session
            .send(&email("(unknown sender)", "bob@localhost"))
            .unwrap();
        session.quit().unwrap();
        assert!(res.is_empty());

        let cmds = server.join().unwrap();
        assert!(cmds.contains(&"MAIL FROM:<>".to_owned()));
        assert!(cmds.contains(&"RCPT TO:<bob@localhost>".to_owned()));
    }

    #[test]
    fn quit_twice() {
        let (addr, server) = serve("250 2.1.0 Ok\r\n", &[]);
        let mut session = session(addr);

        session.quit().unwrap();
        session.quit().unwrap();
        assert!(matches!(
            session.send(&email("alice@localhost", "bob@localhost")),
            Err(Error::ClosedSessionError)
        ));

        let cmds = server.join().unwrap();
        assert_eq!(1, cmds.iter().filter(|cmd| *cmd == "QUIT").count());
    }
}
