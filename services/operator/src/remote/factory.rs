//! Per-pass client construction.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{InMemoryRemote, RemoteClient};
use crate::resources::SecretKeyRef;
use crate::secrets::SecretStore;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("secret {name} has no key {key}")]
    MissingCredentials { name: String, key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Connection settings forwarded to every client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub hostname: String,
    pub skip_tls_verify: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            hostname: "app.terraform.io".to_string(),
            skip_tls_verify: false,
        }
    }
}

/// Builds a short-lived client for one record's credentials.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn client(
        &self,
        namespace: &str,
        credentials: &SecretKeyRef,
    ) -> Result<Arc<dyn RemoteClient>, ClientError>;
}

/// Factory handing out the shared in-process backend once the referenced
/// credentials resolve.
pub struct InMemoryClientFactory {
    remote: Arc<InMemoryRemote>,
    secrets: Arc<dyn SecretStore>,
    options: ClientOptions,
}

impl InMemoryClientFactory {
    pub fn new(
        remote: Arc<InMemoryRemote>,
        secrets: Arc<dyn SecretStore>,
        options: ClientOptions,
    ) -> Self {
        Self {
            remote,
            secrets,
            options,
        }
    }
}

#[async_trait]
impl ClientFactory for InMemoryClientFactory {
    async fn client(
        &self,
        namespace: &str,
        credentials: &SecretKeyRef,
    ) -> Result<Arc<dyn RemoteClient>, ClientError> {
        let token = self
            .secrets
            .secret_value(namespace, &credentials.name, &credentials.key)
            .await?;

        match token {
            Some(token) if !token.is_empty() => {
                debug!(
                    hostname = %self.options.hostname,
                    skip_tls_verify = self.options.skip_tls_verify,
                    "Resolved platform credentials"
                );
                Ok(self.remote.clone())
            }
            _ => Err(ClientError::MissingCredentials {
                name: credentials.name.clone(),
                key: credentials.key.clone(),
            }),
        }
    }
}
