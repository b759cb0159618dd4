//! Credentials for the scoring service.
//!
//! Providers are tried once, up front, before any scoring call. A
//! [`ChainedCredentialProvider`] models the "non-interactive first, interactive
//! second" lookup order: the first provider that yields a credential wins.

use std::{env, fmt, sync::Arc};

use reqwest::RequestBuilder;

use crate::error::AuthError;

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Sent as the `api-key` header.
    ApiKey(String),
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(String),
}

impl Credential {
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Bearer(token) => builder.bearer_auth(token),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Result<Credential, AuthError>;

    fn name(&self) -> &str;
}

/// A credential fixed at construction, typically the configured access key.
pub struct StaticCredential {
    credential: Credential,
}

impl StaticCredential {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new(Credential::ApiKey(key.into()))
    }
}

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Result<Credential, AuthError> {
        let secret = match &self.credential {
            Credential::ApiKey(value) | Credential::Bearer(value) => value,
        };
        if secret.trim().is_empty() {
            return Err(AuthError::Unavailable("static credential is empty".to_string()));
        }
        Ok(self.credential.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Reads a bearer token from an environment variable at lookup time.
pub struct EnvCredential {
    variable: String,
}

impl EnvCredential {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl CredentialProvider for EnvCredential {
    fn credential(&self) -> Result<Credential, AuthError> {
        match env::var(&self.variable) {
            Ok(token) if !token.trim().is_empty() => Ok(Credential::Bearer(token)),
            _ => Err(AuthError::Unavailable(format!("{} is not set", self.variable))),
        }
    }

    fn name(&self) -> &str {
        &self.variable
    }
}

#[derive(Default)]
pub struct ChainedCredentialProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainedCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.providers.push(provider);
        self
    }
}

impl CredentialProvider for ChainedCredentialProvider {
    fn credential(&self) -> Result<Credential, AuthError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.credential() {
                Ok(credential) => {
                    tracing::debug!(provider = provider.name(), "credential obtained");
                    return Ok(credential);
                }
                Err(error) => failures.push(format!("{}: {error}", provider.name())),
            }
        }
        Err(AuthError::Exhausted(failures))
    }

    fn name(&self) -> &str {
        "chain"
    }
}
