//! Configurable values shared between the source and destination connectors,
//! parsed from the flat string map the host pipeline hands over.

use crate::error::{Error, Result};
use bson::{doc, Document};
use mongodb::options::{ClientOptions, Credential};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default MongoDB connection URI.
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";
/// Default authentication database.
pub const DEFAULT_AUTH_DB: &str = "admin";

pub const KEY_URI: &str = "uri";
pub const KEY_DB: &str = "db";
pub const KEY_COLLECTION: &str = "collection";
pub const KEY_AUTH_USERNAME: &str = "auth.username";
pub const KEY_AUTH_PASSWORD: &str = "auth.password";
pub const KEY_AUTH_DB: &str = "auth.db";
pub const KEY_AUTH_MECHANISM: &str = "auth.mechanism";
pub const KEY_AUTH_TLS_CA_FILE: &str = "auth.tls.caFile";
pub const KEY_AUTH_TLS_CERTIFICATE_KEY_FILE: &str = "auth.tls.certificateKeyFile";
pub const KEY_AUTH_AWS_SESSION_TOKEN: &str = "auth.awsSessionToken";

const MAX_DB_NAME_LENGTH: usize = 64;

// AWS session token property name for the auth mechanism properties.
const AWS_SESSION_TOKEN_PROPERTY: &str = "AWS_SESSION_TOKEN";
// URL query names for the TLS files, used by the X.509 mechanism.
const TLS_CA_FILE_QUERY: &str = "tlsCAFile";
const TLS_CERTIFICATE_KEY_FILE_QUERY: &str = "tlsCertificateKeyFile";

/// A MongoDB authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    ScramSha256,
    ScramSha1,
    MongoDbCr,
    MongoDbAws,
    MongoDbX509,
}

impl AuthMechanism {
    /// Parse a mechanism name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            "SCRAM-SHA-1" => Ok(Self::ScramSha1),
            "MONGODB-CR" => Ok(Self::MongoDbCr),
            "MONGODB-AWS" => Ok(Self::MongoDbAws),
            "MONGODB-X509" => Ok(Self::MongoDbX509),
            other => Err(Error::Config(format!("invalid auth mechanism {other:?}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::MongoDbCr => "MONGODB-CR",
            Self::MongoDbAws => "MONGODB-AWS",
            Self::MongoDbX509 => "MONGODB-X509",
        }
    }
}

/// Authentication-specific configurable values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// The database holding the user's authentication data.
    pub db: Option<String>,
    pub mechanism: Option<AuthMechanism>,
    /// Path to a single certificate authority or a CA bundle to trust.
    pub tls_ca_file: Option<PathBuf>,
    /// Path to the client certificate file or the client private key file.
    pub tls_certificate_key_file: Option<PathBuf>,
    pub aws_session_token: Option<String>,
}

/// Configurable values shared between the source and destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// The connection string. May contain host names, IPv4/IPv6 literals, or
    /// an SRV record.
    pub uri: Url,
    /// The database the connector works with.
    pub db: String,
    /// The collection the connector reads from or writes to.
    pub collection: String,
    pub auth: AuthConfig,
}

impl Config {
    /// Parse and validate the shared configuration from a raw string map.
    pub fn parse(raw: &HashMap<String, String>) -> Result<Self> {
        let uri_str = raw
            .get(KEY_URI)
            .filter(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or(DEFAULT_URI);
        let uri = Url::parse(uri_str)
            .map_err(|e| Error::Config(format!("parse {KEY_URI:?}: {e}")))?;

        let db = required(raw, KEY_DB)?;
        if db.len() > MAX_DB_NAME_LENGTH {
            return Err(Error::Config(format!(
                "{KEY_DB:?} must be at most {MAX_DB_NAME_LENGTH} characters"
            )));
        }
        let collection = required(raw, KEY_COLLECTION)?;

        let mechanism = optional(raw, KEY_AUTH_MECHANISM)
            .map(|s| AuthMechanism::parse(&s))
            .transpose()?;

        let auth = AuthConfig {
            username: optional(raw, KEY_AUTH_USERNAME),
            password: optional(raw, KEY_AUTH_PASSWORD),
            db: optional(raw, KEY_AUTH_DB),
            mechanism,
            tls_ca_file: existing_file(raw, KEY_AUTH_TLS_CA_FILE)?,
            tls_certificate_key_file: existing_file(raw, KEY_AUTH_TLS_CERTIFICATE_KEY_FILE)?,
            aws_session_token: optional(raw, KEY_AUTH_AWS_SESSION_TOKEN),
        };

        Ok(Self {
            uri,
            db,
            collection,
            auth,
        })
    }

    fn is_auth_configured(&self) -> bool {
        self.auth != AuthConfig::default()
    }

    /// Assemble driver client options: the parsed URI plus credentials for
    /// the configured mechanism and a bounded server selection timeout.
    pub async fn client_options(&self) -> Result<ClientOptions> {
        let (uri, mechanism_properties) = self.uri_and_properties();

        let mut options = ClientOptions::parse(uri.as_str())
            .await
            .map_err(|e| Error::Config(format!("parse connection options: {e}")))?;
        options.server_selection_timeout = Some(Duration::from_secs(5));

        // Without custom auth options, skip adding credentials entirely.
        if !self.is_auth_configured() {
            return Ok(options);
        }

        let mechanism = self
            .auth
            .mechanism
            .map(|m| {
                m.as_str()
                    .parse::<mongodb::options::AuthMechanism>()
                    .map_err(|e| {
                        Error::Config(format!(
                            "auth mechanism {:?} is not supported by the driver: {e}",
                            m.as_str()
                        ))
                    })
            })
            .transpose()?;

        let credential = Credential::builder()
            .username(self.auth.username.clone())
            .password(self.auth.password.clone())
            .source(
                self.auth
                    .db
                    .clone()
                    .or_else(|| Some(DEFAULT_AUTH_DB.to_string())),
            )
            .mechanism(mechanism)
            .mechanism_properties(mechanism_properties)
            .build();
        options.credential = Some(credential);

        Ok(options)
    }

    // X.509 routes the TLS files through URI query parameters; AWS passes the
    // session token as a mechanism property. Other mechanisms need neither.
    fn uri_and_properties(&self) -> (Url, Option<Document>) {
        match self.auth.mechanism {
            Some(AuthMechanism::MongoDbX509) => {
                let mut uri = self.uri.clone();
                {
                    let mut query = uri.query_pairs_mut();
                    if let Some(ca_file) = &self.auth.tls_ca_file {
                        query.append_pair(TLS_CA_FILE_QUERY, &ca_file.to_string_lossy());
                    }
                    if let Some(key_file) = &self.auth.tls_certificate_key_file {
                        query.append_pair(
                            TLS_CERTIFICATE_KEY_FILE_QUERY,
                            &key_file.to_string_lossy(),
                        );
                    }
                }

                (uri, None)
            }

            Some(AuthMechanism::MongoDbAws) => {
                let properties = self
                    .auth
                    .aws_session_token
                    .as_ref()
                    .map(|token| doc! { AWS_SESSION_TOKEN_PROPERTY: token.as_str() });

                (self.uri.clone(), properties)
            }

            _ => (self.uri.clone(), None),
        }
    }
}

fn required(raw: &HashMap<String, String>, key: &str) -> Result<String> {
    raw.get(key)
        .filter(|s| !s.is_empty())
        .cloned()
        .ok_or_else(|| Error::Config(format!("{key:?} is required")))
}

fn optional(raw: &HashMap<String, String>, key: &str) -> Option<String> {
    raw.get(key).filter(|s| !s.is_empty()).cloned()
}

fn existing_file(raw: &HashMap<String, String>, key: &str) -> Result<Option<PathBuf>> {
    match optional(raw, key) {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "{key:?}: file {path:?} does not exist"
                )));
            }
            Ok(Some(path))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_minimal_config_uses_default_uri() {
        let config = Config::parse(&raw(&[(KEY_DB, "test"), (KEY_COLLECTION, "users")])).unwrap();

        assert_eq!(config.uri.as_str(), "mongodb://localhost:27017");
        assert_eq!(config.db, "test");
        assert_eq!(config.collection, "users");
        assert_eq!(config.auth, AuthConfig::default());
    }

    #[test]
    fn test_parse_requires_db_and_collection() {
        assert!(Config::parse(&raw(&[(KEY_COLLECTION, "users")])).is_err());
        assert!(Config::parse(&raw(&[(KEY_DB, "test")])).is_err());
        assert!(Config::parse(&raw(&[(KEY_DB, ""), (KEY_COLLECTION, "users")])).is_err());
    }

    #[test]
    fn test_parse_rejects_overlong_db_name() {
        let long = "d".repeat(65);
        let result = Config::parse(&raw(&[(KEY_DB, &long), (KEY_COLLECTION, "users")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_uri() {
        let result = Config::parse(&raw(&[
            (KEY_URI, "not a uri"),
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_auth_mechanism_is_case_insensitive() {
        let config = Config::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_AUTH_MECHANISM, "scram-sha-256"),
        ]))
        .unwrap();

        assert_eq!(config.auth.mechanism, Some(AuthMechanism::ScramSha256));
    }

    #[test]
    fn test_unknown_auth_mechanism_is_rejected() {
        let result = Config::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_AUTH_MECHANISM, "KERBEROS"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_tls_file_is_rejected() {
        let result = Config::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_AUTH_TLS_CA_FILE, "/definitely/not/a/real/ca.pem"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_existing_tls_file_is_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"---").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = Config::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_AUTH_TLS_CA_FILE, &path),
        ]))
        .unwrap();

        assert_eq!(config.auth.tls_ca_file, Some(PathBuf::from(path)));
    }

    #[tokio::test]
    async fn test_client_options_carry_credentials_and_timeout() {
        let config = Config::parse(&raw(&[
            (KEY_DB, "test"),
            (KEY_COLLECTION, "users"),
            (KEY_AUTH_USERNAME, "user"),
            (KEY_AUTH_PASSWORD, "pass"),
            (KEY_AUTH_MECHANISM, "SCRAM-SHA-256"),
        ]))
        .unwrap();

        let options = config.client_options().await.unwrap();

        assert_eq!(
            options.server_selection_timeout,
            Some(Duration::from_secs(5))
        );
        let credential = options.credential.expect("credential should be set");
        assert_eq!(credential.username.as_deref(), Some("user"));
        assert_eq!(credential.source.as_deref(), Some(DEFAULT_AUTH_DB));
        assert_eq!(
            credential.mechanism,
            Some(mongodb::options::AuthMechanism::ScramSha256)
        );
    }

    #[tokio::test]
    async fn test_client_options_without_auth_have_no_credential() {
        let config = Config::parse(&raw(&[(KEY_DB, "test"), (KEY_COLLECTION, "users")])).unwrap();
        let options = config.client_options().await.unwrap();
        assert!(options.credential.is_none());
    }
}
