//! The socket layer.
//!
//! [`Transport`] is the seam between the relay pool and the network. The
//! pool decides *when* to connect, retry or give up; a transport only
//! performs single attempts and reports inbound traffic on the session
//! channel. [`NostrSdkTransport`] implements it over a `nostr-sdk`
//! [`Client`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nostr::{EventBuilder, Filter, Kind, RelayUrl, SubscriptionId, Tag, Timestamp};
use nostr_sdk::{Client, RelayMessage, RelayPoolNotification, SubscribeOptions};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::error::{RelayError, RelayResult};
use super::message::RelayEnvelope;
use super::types::PublishResult;
use crate::graph::SocialDocument;
use crate::session::{SessionEvent, SessionSender};

/// Validates a relay URL.
///
/// # Errors
///
/// Returns [`RelayError::InvalidUrl`] unless the URL is a `ws://` or
/// `wss://` URL.
pub fn validate_relay_url(url: &str) -> RelayResult<RelayUrl> {
    RelayUrl::parse(url).map_err(|e| RelayError::InvalidUrl(format!("{url}: {e}")))
}

/// Single-attempt access to relays.
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection, waiting at most `timeout` for the handshake.
    fn connect(&self, url: &str, timeout: Duration) -> impl Future<Output = RelayResult<()>> + Send;

    /// Closes a connection. Closing an unknown relay is a no-op.
    fn close(&self, url: &str) -> impl Future<Output = ()> + Send;

    /// Sends a query to `relays`.
    ///
    /// Returns the relays it could not be sent to.
    fn request(
        &self,
        subscription_id: String,
        filters: Vec<Filter>,
        relays: Vec<String>,
    ) -> impl Future<Output = RelayResult<Vec<String>>> + Send;

    /// Ends a query on every relay.
    fn unsubscribe(&self, subscription_id: String) -> impl Future<Output = ()> + Send;

    /// Signs and sends a document to `relays`.
    fn publish(
        &self,
        document: SocialDocument,
        relays: Vec<String>,
    ) -> impl Future<Output = RelayResult<PublishResult>> + Send;
}

/// [`Transport`] over a `nostr-sdk` client.
///
/// The client must carry the user's signer for [`Transport::publish`].
#[derive(Clone)]
pub struct NostrSdkTransport {
    client: Client,
    events: SessionSender,
    watch_interval: Duration,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl NostrSdkTransport {
    /// Wraps a client. Live relays are checked every `watch_interval`.
    #[must_use]
    pub fn new(client: Client, events: SessionSender, watch_interval: Duration) -> Self {
        Self {
            client,
            events,
            watch_interval,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the underlying client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Forwards EVENT and EOSE notifications to the session channel until
    /// the client shuts down or the channel closes.
    pub fn spawn_notification_pump(&self) -> JoinHandle<()> {
        let mut notifications = self.client.notifications();
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                let notification = match notifications.recv().await {
                    Ok(notification) => notification,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Notification pump lagged, skipped {skipped} messages");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let (relay_url, envelope) = match notification {
                    RelayPoolNotification::Event {
                        relay_url,
                        subscription_id,
                        event,
                    } => (
                        relay_url,
                        RelayEnvelope::Event {
                            subscription_id: subscription_id.to_string(),
                            document: SocialDocument::from(event.as_ref()),
                        },
                    ),
                    RelayPoolNotification::Message {
                        relay_url,
                        message: RelayMessage::EndOfStoredEvents(subscription_id),
                    } => (
                        relay_url,
                        RelayEnvelope::EndOfStoredEvents {
                            subscription_id: subscription_id.to_string(),
                        },
                    ),
                    RelayPoolNotification::Shutdown => break,
                    _ => continue,
                };

                let inbound = SessionEvent::Inbound {
                    relay: relay_url.to_string(),
                    envelope,
                };
                if events.send(inbound).is_err() {
                    break;
                }
            }
            log::debug!("Notification pump stopped");
        })
    }

    async fn next_generation(&self, url: &str) -> u64 {
        let mut generations = self.generations.lock().await;
        let generation = generations.entry(url.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Reports a drop of `url` once the relay stops being connected.
    fn spawn_watch(&self, url: String, generation: u64) {
        let client = self.client.clone();
        let events = self.events.clone();
        let generations = Arc::clone(&self.generations);
        let interval = self.watch_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if generations.lock().await.get(&url) != Some(&generation) {
                    return;
                }
                match client.relay(url.as_str()).await {
                    Ok(relay) if relay.is_connected() => {}
                    _ => break,
                }
            }

            let _ = client.remove_relay(url.as_str()).await;
            let _ = events.send(SessionEvent::Failed {
                url,
                reason: "connection lost".to_string(),
            });
        });
    }
}

impl Transport for NostrSdkTransport {
    async fn connect(&self, url: &str, timeout: Duration) -> RelayResult<()> {
        let relay_url = validate_relay_url(url)?;

        self.client
            .add_relay(relay_url.clone())
            .await
            .map_err(|e| RelayError::Connection {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self.client.try_connect_relay(relay_url.clone(), timeout).await {
            // Leave nothing behind that would reconnect on its own.
            let _ = self.client.remove_relay(relay_url).await;
            return Err(RelayError::Connection {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }

        let generation = self.next_generation(url).await;
        self.spawn_watch(url.to_string(), generation);
        Ok(())
    }

    async fn close(&self, url: &str) {
        if let Err(e) = self.client.remove_relay(url).await {
            log::debug!("Closing {url}: {e}");
        }
    }

    async fn request(
        &self,
        subscription_id: String,
        filters: Vec<Filter>,
        relays: Vec<String>,
    ) -> RelayResult<Vec<String>> {
        let relays = relays
            .iter()
            .map(|url| validate_relay_url(url))
            .collect::<RelayResult<Vec<_>>>()?;

        let output = self
            .client
            .pool()
            .subscribe_with_id_to(
                relays,
                SubscriptionId::new(subscription_id),
                filters,
                SubscribeOptions::default(),
            )
            .await
            .map_err(|e| RelayError::Subscription(e.to_string()))?;

        Ok(output.failed.keys().map(ToString::to_string).collect())
    }

    async fn unsubscribe(&self, subscription_id: String) {
        self.client
            .unsubscribe(&SubscriptionId::new(subscription_id))
            .await;
    }

    async fn publish(
        &self,
        document: SocialDocument,
        relays: Vec<String>,
    ) -> RelayResult<PublishResult> {
        if relays.is_empty() {
            return Err(RelayError::NoWriteRelays);
        }
        let relays = relays
            .iter()
            .map(|url| validate_relay_url(url))
            .collect::<RelayResult<Vec<_>>>()?;

        let mut tags = Vec::with_capacity(document.tags.len());
        for parts in &document.tags {
            let tag = Tag::parse(parts).map_err(|e| RelayError::Publish(e.to_string()))?;
            tags.push(tag);
        }
        let builder = EventBuilder::new(Kind::from(document.kind), document.content)
            .tags(tags)
            .custom_created_at(Timestamp::from(document.created_at));

        let output = self
            .client
            .send_event_builder_to(relays, builder)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;

        let result = PublishResult {
            event_id: output.val,
            accepted_by: output.success.iter().map(ToString::to_string).collect(),
            rejected_by: output
                .failed
                .iter()
                .map(|(url, error)| (url.to_string(), error.clone()))
                .collect(),
        };

        if result.is_success() {
            Ok(result)
        } else {
            Err(RelayError::AllRelaysFailed)
        }
    }
}
