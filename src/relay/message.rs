//! Inbound relay envelopes.
//!
//! Relays answer a query with zero or more `["EVENT", id, payload]`
//! messages followed by one `["EOSE", id]`. Everything else a relay may
//! send (`OK`, `NOTICE`, `CLOSED`, ...) is not routed here.

use serde_json::Value;

use super::error::{RelayError, RelayResult};
use crate::graph::SocialDocument;

/// A routed relay message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnvelope {
    /// One stored or live document for a subscription.
    Event {
        /// Subscription the document answers.
        subscription_id: String,
        /// The document.
        document: SocialDocument,
    },
    /// The relay has delivered all stored documents for a subscription.
    EndOfStoredEvents {
        /// Subscription that reached end of stream.
        subscription_id: String,
    },
}

impl RelayEnvelope {
    /// Returns the subscription id this message belongs to.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        match self {
            Self::Event {
                subscription_id, ..
            }
            | Self::EndOfStoredEvents { subscription_id } => subscription_id,
        }
    }

    /// Parses a raw relay message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedMessage`] if the text is not a JSON
    /// array with a string type and subscription id,
    /// [`RelayError::UnsupportedMessage`] for message types other than
    /// `EVENT` and `EOSE`, and [`RelayError::Document`] if an `EVENT`
    /// payload is not a document.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        let Value::Array(mut parts) = value else {
            return Err(RelayError::MalformedMessage(
                "expected a JSON array".to_string(),
            ));
        };

        let kind = match parts.first() {
            Some(Value::String(kind)) => kind.clone(),
            _ => {
                return Err(RelayError::MalformedMessage(
                    "missing message type".to_string(),
                ))
            }
        };
        let subscription_id = match parts.get(1) {
            Some(Value::String(id)) => id.clone(),
            _ => {
                return Err(RelayError::MalformedMessage(format!(
                    "{kind} without subscription id"
                )))
            }
        };

        match kind.as_str() {
            "EVENT" => {
                if parts.len() < 3 {
                    return Err(RelayError::MalformedMessage(
                        "EVENT without payload".to_string(),
                    ));
                }
                let payload = parts.swap_remove(2);
                Ok(Self::Event {
                    subscription_id,
                    document: SocialDocument::from_value(payload)?,
                })
            }
            "EOSE" => Ok(Self::EndOfStoredEvents { subscription_id }),
            other => Err(RelayError::UnsupportedMessage(other.to_string())),
        }
    }
}
