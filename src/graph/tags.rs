//! Tag builders for social-graph documents.
//!
//! - `p` tag: pubkey reference, optionally with relay hint and petname
//! - `d` tag: list discriminator for categorized people lists
//! - `e` tag: event reference (reactions)

/// Builder for document tags.
///
/// # Example
///
/// ```
/// use kith_core::graph::TagBuilder;
///
/// let tag = TagBuilder::p_tag("abc123");
/// assert_eq!(tag, vec!["p", "abc123"]);
/// ```
pub struct TagBuilder;

impl TagBuilder {
    /// Builds a `p` tag referencing a pubkey.
    ///
    /// # Example
    ///
    /// ```
    /// use kith_core::graph::TagBuilder;
    ///
    /// let tag = TagBuilder::p_tag("abc123def456");
    /// assert_eq!(tag, vec!["p", "abc123def456"]);
    /// ```
    #[must_use]
    pub fn p_tag(pubkey: &str) -> Vec<String> {
        vec!["p".to_string(), pubkey.to_string()]
    }

    /// Builds a `p` tag with relay hint, petname and a trailing marker.
    ///
    /// Filter-list entries use the fifth element to carry their flags.
    #[must_use]
    pub fn p_tag_with_marker(pubkey: &str, relay: &str, petname: &str, marker: &str) -> Vec<String> {
        vec![
            "p".to_string(),
            pubkey.to_string(),
            relay.to_string(),
            petname.to_string(),
            marker.to_string(),
        ]
    }

    /// Builds the `d` tag identifying a categorized people list.
    ///
    /// # Example
    ///
    /// ```
    /// use kith_core::graph::TagBuilder;
    ///
    /// let tag = TagBuilder::d_tag("allowlist");
    /// assert_eq!(tag, vec!["d", "allowlist"]);
    /// ```
    #[must_use]
    pub fn d_tag(identifier: &str) -> Vec<String> {
        vec!["d".to_string(), identifier.to_string()]
    }

    /// Builds an `e` tag referencing an event.
    #[must_use]
    pub fn e_tag(event_id: &str) -> Vec<String> {
        vec!["e".to_string(), event_id.to_string()]
    }

    /// Returns the value of a tag if its discriminator matches `name`.
    #[must_use]
    pub fn value<'a>(tag: &'a [String], name: &str) -> Option<&'a str> {
        match tag {
            [first, value, ..] if first == name => Some(value.as_str()),
            _ => None,
        }
    }
}
