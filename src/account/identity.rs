//! Identity resolution from a signing agent.

use std::future::Future;
use std::time::Duration;

use nostr::{Keys, PublicKey};

use super::error::IdentityError;

/// Source of the user's public key (browser extension, bunker, local keys).
pub trait SigningAgent: Send + Sync + 'static {
    /// Returns the public key, or why it cannot.
    fn public_key(&self) -> impl Future<Output = Result<PublicKey, IdentityError>> + Send;
}

impl SigningAgent for Keys {
    async fn public_key(&self) -> Result<PublicKey, IdentityError> {
        Ok(Self::public_key(self))
    }
}

/// Asks `agent` for the public key, retrying once after `retry_delay` if it
/// is not available yet.
///
/// Returns `None` (anonymous) when both tries fail or the agent refuses.
pub async fn lookup_public_key<A: SigningAgent>(agent: &A, retry_delay: Duration) -> Option<PublicKey> {
    match agent.public_key().await {
        Ok(pubkey) => return Some(pubkey),
        Err(IdentityError::Unavailable) => {
            log::debug!("Signing agent unavailable, retrying in {retry_delay:?}");
        }
        Err(e) => {
            log::warn!("Key lookup failed: {e}");
            return None;
        }
    }

    tokio::time::sleep(retry_delay).await;
    match agent.public_key().await {
        Ok(pubkey) => Some(pubkey),
        Err(e) => {
            log::warn!("Key lookup failed, continuing anonymously: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FlakyAgent {
        keys: Keys,
        failures: usize,
        calls: AtomicUsize,
    }

    impl SigningAgent for FlakyAgent {
        async fn public_key(&self) -> Result<PublicKey, IdentityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(IdentityError::Unavailable)
            } else {
                Ok(self.keys.public_key())
            }
        }
    }

    struct RefusingAgent(AtomicUsize);

    impl SigningAgent for RefusingAgent {
        async fn public_key(&self) -> Result<PublicKey, IdentityError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(IdentityError::Rejected("user said no".to_string()))
        }
    }

    fn flaky(failures: usize) -> FlakyAgent {
        FlakyAgent {
            keys: Keys::generate(),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn keys_resolve_immediately() {
        let keys = Keys::generate();
        let found = lookup_public_key(&keys, Duration::from_secs(60)).await;
        assert_eq!(found, Some(keys.public_key()));
    }

    #[tokio::test]
    async fn retries_once_when_unavailable() {
        let agent = flaky(1);
        let found = lookup_public_key(&agent, Duration::from_millis(1)).await;
        assert_eq!(found, Some(agent.keys.public_key()));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let agent = flaky(5);
        assert_eq!(lookup_public_key(&agent, Duration::from_millis(1)).await, None);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refusal_is_not_retried() {
        let agent = RefusingAgent(AtomicUsize::new(0));
        assert_eq!(lookup_public_key(&agent, Duration::from_millis(1)).await, None);
        assert_eq!(agent.0.load(Ordering::SeqCst), 1);
    }
}
