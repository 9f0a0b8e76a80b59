use marquee_core::DeviceIdentity;
use std::sync::Arc;
use tracing::{error, info};

use crate::platform::IdentityProvider;

/// Resolves the device identity through a provider chain: a static
/// override wins outright, otherwise the managed-platform serial query is
/// awaited. First success wins; a provider that answers is never second-
/// guessed, only an outright failure falls through. No identity at all
/// means the instance must not attempt registration.
pub struct IdentityResolver {
    override_id: Option<String>,
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityResolver {
    pub fn new(override_id: Option<String>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            override_id,
            provider,
        }
    }

    pub async fn resolve(&self) -> Option<DeviceIdentity> {
        if let Some(id) = &self.override_id {
            info!(target: "marquee.identity", %id, "using configured device id");
            return Some(DeviceIdentity::new(id.clone()));
        }

        match self.provider.serial_number().await {
            Ok(Some(serial)) if !serial.is_empty() => {
                info!(target: "marquee.identity", %serial, "using managed serial number as device id");
                Some(DeviceIdentity::new(serial))
            }
            Ok(_) => {
                info!(target: "marquee.identity", "managed identity unavailable");
                None
            }
            Err(err) => {
                error!(target: "marquee.identity", %err, "managed serial number query failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        answer: Option<String>,
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        async fn serial_number(&self) -> Result<Option<String>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    #[tokio::test]
    async fn override_skips_managed_provider() {
        let provider = Arc::new(CountingProvider::default());
        let resolver = IdentityResolver::new(Some("device-override".into()), provider.clone());

        let identity = resolver.resolve().await.expect("identity");
        assert_eq!(identity.id, "device-override");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn managed_serial_used_without_override() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            answer: Some("SN-77".into()),
        });
        let resolver = IdentityResolver::new(None, provider.clone());

        let identity = resolver.resolve().await.expect("identity");
        assert_eq!(identity.id, "SN-77");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_answer_resolves_to_no_identity() {
        let provider = Arc::new(CountingProvider::default());
        let resolver = IdentityResolver::new(None, provider);
        assert!(resolver.resolve().await.is_none());
    }
}
