use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::error::ProviderError;
use crate::provider::MessagingProvider;

/// Resolves the messaging session that sends on behalf of a shop.
pub trait SessionManager: Send + Sync {
    fn provider_for_shop(&self, shop_id: Uuid) -> Result<Arc<dyn MessagingProvider>, ProviderError>;

    /// Every distinct session, for status reporting and event subscription.
    fn providers(&self) -> Vec<Arc<dyn MessagingProvider>>;
}

/// One session shared by every shop.
pub struct SharedSessionManager {
    provider: Arc<dyn MessagingProvider>,
}

impl SharedSessionManager {
    pub fn new(provider: Arc<dyn MessagingProvider>) -> Self {
        Self { provider }
    }
}

impl SessionManager for SharedSessionManager {
    fn provider_for_shop(&self, _shop_id: Uuid) -> Result<Arc<dyn MessagingProvider>, ProviderError> {
        Ok(self.provider.clone())
    }

    fn providers(&self) -> Vec<Arc<dyn MessagingProvider>> {
        vec![self.provider.clone()]
    }
}

/// Sessions registered per shop, with an optional fallback for the rest.
pub struct ShopSessionManager {
    sessions: RwLock<HashMap<Uuid, Arc<dyn MessagingProvider>>>,
    fallback: Option<Arc<dyn MessagingProvider>>,
}

impl ShopSessionManager {
    pub fn new(fallback: Option<Arc<dyn MessagingProvider>>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            fallback,
        }
    }

    pub fn register(&self, shop_id: Uuid, provider: Arc<dyn MessagingProvider>) {
        tracing::info!(
            shop_id = %shop_id,
            session_id = provider.session_id(),
            "Messaging session registered"
        );
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shop_id, provider);
    }

    pub fn remove(&self, shop_id: Uuid) -> Option<Arc<dyn MessagingProvider>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&shop_id)
    }
}

impl SessionManager for ShopSessionManager {
    fn provider_for_shop(&self, shop_id: Uuid) -> Result<Arc<dyn MessagingProvider>, ProviderError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&shop_id)
            .cloned()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| ProviderError::UnknownSession(shop_id.to_string()))
    }

    fn providers(&self) -> Vec<Arc<dyn MessagingProvider>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Arc<dyn MessagingProvider>> = Vec::new();
        for provider in sessions.values().chain(self.fallback.iter()) {
            if !all.iter().any(|p| p.session_id() == provider.session_id()) {
                all.push(provider.clone());
            }
        }
        all
    }
}
