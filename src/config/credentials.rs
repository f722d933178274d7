//! Credentials module.
//!
//! This module contains the representation of the SMTP server
//! credentials, merged from a JSON file, a JSON mapping and explicit
//! overrides.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fs,
    io::{self, BufReader},
    path::{Path, PathBuf},
    result,
};
use thiserror::Error;

use crate::MailClient;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open credentials file {1:?}")]
    OpenCredentialsFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse credentials file {1:?}")]
    ParseCredentialsFileError(#[source] serde_json::Error, PathBuf),
    #[error("cannot parse credentials")]
    ParseCredentialsError(#[source] serde_json::Error),
}

pub type Result<T> = result::Result<T, Error>;

/// Represents the base the credentials are merged on.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum CredentialsSource<'a> {
    /// Starts from an empty mapping.
    #[default]
    None,
    /// Starts from a copy of the given JSON mapping.
    Map(&'a Map<String, Value>),
    /// Starts from the JSON object stored in the given file.
    File(&'a Path),
}

impl<'a> From<&'a Map<String, Value>> for CredentialsSource<'a> {
    fn from(map: &'a Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl<'a> From<&'a Path> for CredentialsSource<'a> {
    fn from(path: &'a Path) -> Self {
        Self::File(path)
    }
}

impl<'a> From<&'a PathBuf> for CredentialsSource<'a> {
    fn from(path: &'a PathBuf) -> Self {
        Self::File(path.as_path())
    }
}

/// Represents the explicit credentials values. Every defined value
/// overrides the one coming from the [`CredentialsSource`].
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct CredentialsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub sender: Option<String>,
    pub minpause: Option<i64>,
}

impl CredentialsOverrides {
    fn apply(self, map: &mut Map<String, Value>) {
        if let Some(host) = self.host {
            map.insert("host".into(), host.into());
        }
        if let Some(port) = self.port {
            map.insert("port".into(), port.into());
        }
        if let Some(user) = self.user {
            map.insert("user".into(), user.into());
        }
        if let Some(password) = self.password {
            map.insert("password".into(), password.into());
        }
        if let Some(sender) = self.sender {
            map.insert("sender".into(), sender.into());
        }
        if let Some(minpause) = self.minpause {
            map.insert("minpause".into(), minpause.into());
        }
    }
}

/// Represents the merged SMTP server credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Represents the SMTP server host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Represents the SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Represents the SMTP server login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Represents the SMTP server password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Represents the default sender address of outgoing emails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Represents the minimum pause between two emails, in seconds.
    /// Only integers throttle, a negative value never does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minpause: Option<i64>,
    /// Keeps unknown keys around.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_port() -> u16 {
    MailClient::DEFAULT_PORT
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            user: None,
            password: None,
            sender: None,
            minpause: None,
            extra: Map::new(),
        }
    }
}

impl Credentials {
    /// Merges the credentials source with the overrides. The sender
    /// defaults to the user and the port defaults to
    /// [`MailClient::DEFAULT_PORT`].
    pub fn merge(source: CredentialsSource, overrides: CredentialsOverrides) -> Result<Self> {
        let mut map = match source {
            CredentialsSource::None => Map::new(),
            CredentialsSource::Map(map) => map.clone(),
            CredentialsSource::File(path) => read_file(path)?,
        };

        overrides.apply(&mut map);

        if !map.contains_key("sender") {
            if let Some(user) = map.get("user").cloned() {
                map.insert("sender".into(), user);
            }
        }

        if map.get("port").map(Value::is_null).unwrap_or(true) {
            map.insert("port".into(), MailClient::DEFAULT_PORT.into());
        }

        let minpause = map
            .get("minpause")
            .filter(|minpause| !minpause.is_null() && minpause.as_i64().is_none())
            .cloned();
        if let Some(minpause) = minpause {
            warn!("minpause {} is not an integer, emails will not be throttled", minpause);
            map.remove("minpause");
        }

        trace!("merged credentials keys: {:?}", map.keys().collect::<Vec<_>>());
        serde_json::from_value(Value::Object(map)).map_err(Error::ParseCredentialsError)
    }
}

/// Reads the JSON object stored at the given path. Shell variables
/// and the home directory are expanded first.
fn read_file(path: &Path) -> Result<Map<String, Value>> {
    let path = path
        .to_str()
        .and_then(|path| shellexpand::full(path).ok())
        .map(|path| PathBuf::from(path.to_string()))
        .unwrap_or_else(|| path.to_owned());
    debug!("reading credentials from {:?}", path);

    let file =
        fs::File::open(&path).map_err(|err| Error::OpenCredentialsFileError(err, path.clone()))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| Error::ParseCredentialsFileError(err, path))
}
