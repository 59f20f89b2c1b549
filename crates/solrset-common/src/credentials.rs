//! Solr basic-auth credentials
//!
//! The operator reads a single opaque Secret (fields `username`/`password`)
//! referenced by `spec.secretName`. The password is zeroized on drop.

use k8s_openapi::api::core::v1::Secret;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors when loading credentials from a Secret
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The Secret has no data at all
    #[error("secret [{0}] has no data")]
    EmptySecret(String),

    /// Required field missing from the Secret
    #[error("secret is missing required field: {0}")]
    MissingField(&'static str),

    /// A field's bytes are not valid UTF-8
    #[error("secret field is not valid UTF-8: {0}")]
    InvalidEncoding(&'static str),
}

/// Basic-auth material for the Solr admin API
#[derive(Debug, Clone)]
pub struct SolrCredentials {
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password (zeroized on drop)
    pub password: Zeroizing<String>,
}

impl SolrCredentials {
    /// Load credentials from an opaque Secret's `username`/`password` fields.
    pub fn from_secret(secret: &Secret) -> Result<Self, CredentialError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let data = secret
            .data
            .as_ref()
            .ok_or(CredentialError::EmptySecret(name))?;

        let field = |key: &'static str| -> Result<String, CredentialError> {
            let bytes = data.get(key).ok_or(CredentialError::MissingField(key))?;
            String::from_utf8(bytes.0.clone())
                .map_err(|_| CredentialError::InvalidEncoding(key))
        };

        Ok(Self {
            username: field("username")?,
            password: Zeroizing::new(field("password")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(fields: &[(&str, &[u8])]) -> Secret {
        let data: BTreeMap<String, ByteString> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
            .collect();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn loads_username_and_password() {
        let secret = secret_with(&[("username", b"solr"), ("password", b"hunter2")]);
        let creds = SolrCredentials::from_secret(&secret).unwrap();
        assert_eq!(creds.username, "solr");
        assert_eq!(&*creds.password, "hunter2");
    }

    #[test]
    fn missing_username_is_an_error() {
        let secret = secret_with(&[("password", b"hunter2")]);
        let err = SolrCredentials::from_secret(&secret).unwrap_err();
        assert!(matches!(err, CredentialError::MissingField("username")));
    }

    #[test]
    fn missing_password_is_an_error() {
        let secret = secret_with(&[("username", b"solr")]);
        let err = SolrCredentials::from_secret(&secret).unwrap_err();
        assert!(matches!(err, CredentialError::MissingField("password")));
    }

    #[test]
    fn non_utf8_password_is_an_error() {
        let secret = secret_with(&[("username", b"solr"), ("password", &[0xff, 0xfe])]);
        let err = SolrCredentials::from_secret(&secret).unwrap_err();
        assert!(matches!(err, CredentialError::InvalidEncoding("password")));
    }

    #[test]
    fn secret_without_data_is_an_error() {
        let secret = Secret::default();
        let err = SolrCredentials::from_secret(&secret).unwrap_err();
        assert!(matches!(err, CredentialError::EmptySecret(_)));
    }
}
