use crate::config::Config;
use crate::error::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Reporting API credentials, resolved once at process start.
#[derive(Deserialize, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub network_code: String,
    pub access_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("network_code", &self.network_code)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolves credentials from the mounted secret file when one is
    /// configured, otherwise from the network code and token options.
    pub fn resolve(config: &Config) -> Result<Self, Error> {
        let credentials = match &config.credentials_file {
            Some(path) => Self::from_file(path)?,
            None => Credentials {
                network_code: config.network_code.clone().unwrap_or_default(),
                access_token: config.api_token.clone().unwrap_or_default(),
            },
        };

        if credentials.network_code.trim().is_empty() {
            return Err(Error::CredentialError {
                reason: "no network code configured".to_string(),
            });
        }
        if credentials.access_token.trim().is_empty() {
            return Err(Error::CredentialError {
                reason: "no API access token configured".to_string(),
            });
        }

        Ok(credentials)
    }

    fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|err| Error::CredentialError {
            reason: format!("cannot read {}: {}", path.display(), err),
        })?;
        serde_json::from_str(&contents).map_err(|err| Error::CredentialError {
            reason: format!("cannot parse {}: {}", path.display(), err),
        })
    }
}
