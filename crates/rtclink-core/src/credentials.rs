use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::errors::LinkError;
use crate::token::{CredentialSource, Credentials, TokenManager, TokenProvider};

/// Source of the API key, user session and token used by the coordinator socket.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn load_token(&self) -> Result<String, LinkError>;

    fn cached_token(&self) -> Option<String> {
        None
    }

    fn cached_api_key(&self) -> String;

    fn user_id(&self) -> Option<String> {
        None
    }
}

/// Lets a credentials provider feed a [`TokenManager`].
struct ProviderTokens(Arc<dyn CredentialsProvider>);

#[async_trait]
impl TokenProvider for ProviderTokens {
    async fn load_token(&self) -> Result<String, LinkError> {
        self.0.load_token().await
    }

    fn cached_token(&self) -> Option<String> {
        self.0.cached_token()
    }
}

/// Token manager plus the API key and user id that go with it.
#[derive(Default)]
pub struct CredentialsManager {
    tokens: TokenManager,
    api_key: RwLock<String>,
    user_id: RwLock<Option<String>>,
}

impl CredentialsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a provider; token, API key and user id are all re-seeded from it.
    pub fn set_provider(&self, provider: Arc<dyn CredentialsProvider>) {
        *self.api_key.write().unwrap() = provider.cached_api_key();
        *self.user_id.write().unwrap() = provider.user_id();
        self.tokens.set_provider(Arc::new(ProviderTokens(provider)));
    }

    pub async fn ensure_token_loaded(&self) -> Result<String, LinkError> {
        self.tokens.ensure_token_loaded().await
    }

    pub async fn load_sync(&self) -> Result<String, LinkError> {
        self.tokens.load_sync().await
    }

    pub fn expire_token(&self) {
        self.tokens.expire_token();
    }

    pub fn update_token(&self, token: impl Into<String>) {
        self.tokens.update_token(token);
    }

    pub fn has_token(&self) -> bool {
        self.tokens.has_token()
    }

    pub fn token(&self) -> String {
        self.tokens.token()
    }

    pub fn api_key(&self) -> String {
        self.api_key.read().unwrap().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().unwrap().clone()
    }
}

#[async_trait]
impl CredentialSource for CredentialsManager {
    async fn ensure_credentials(&self) -> Result<Credentials, LinkError> {
        let token = self.ensure_token_loaded().await?;
        Ok(Credentials {
            token,
            api_key: Some(self.api_key()),
            user_id: self.user_id(),
        })
    }

    fn expire(&self) {
        self.expire_token();
    }
}
