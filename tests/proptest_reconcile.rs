//! Property-based tests for last-write-wins reconciliation.
//!
//! These tests verify:
//! - Replace scopes end in the same state whatever the delivery order
//! - Re-delivering any document is a no-op
//! - Stored timestamps never move backwards
//! - Mute lists accumulate pubkeys when delivered oldest first

use kith_core::graph::{
    merge_document, GraphScope, SocialDocument, SocialGraph, TagBuilder, ALLOWLIST_IDENTIFIER,
    KIND_CATEGORIZED_PEOPLE, KIND_CONTACTS, KIND_MUTE_LIST,
};
use proptest::prelude::*;

fn pubkeys() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f0-9]{8}", 0..6)
}

fn document(kind: u16, identifier: Option<&str>, created_at: u64, pubkeys: &[String]) -> SocialDocument {
    let document = SocialDocument::new(kind, created_at);
    let document = match identifier {
        Some(identifier) => document.with_tag(TagBuilder::d_tag(identifier)),
        None => document,
    };
    document.with_tags(pubkeys.iter().map(|p| TagBuilder::p_tag(p)))
}

/// Documents of one replace scope with distinct timestamps.
fn replace_documents() -> impl Strategy<Value = Vec<SocialDocument>> {
    let scope = prop_oneof![
        Just((KIND_CONTACTS, None)),
        Just((KIND_CATEGORIZED_PEOPLE, Some(ALLOWLIST_IDENTIFIER))),
    ];
    (scope, prop::collection::btree_map(1u64..10_000, pubkeys(), 1..8)).prop_map(
        |((kind, identifier), by_time)| {
            by_time
                .iter()
                .map(|(created_at, pubkeys)| document(kind, identifier, *created_at, pubkeys))
                .collect()
        },
    )
}

fn merge_all(documents: &[SocialDocument]) -> SocialGraph {
    let mut graph = SocialGraph::default();
    for document in documents {
        merge_document(&mut graph, document);
    }
    graph
}

proptest! {
    #[test]
    fn replace_scopes_are_order_independent(
        (documents, shuffled) in replace_documents()
            .prop_flat_map(|docs| (Just(docs.clone()), Just(docs).prop_shuffle()))
    ) {
        prop_assert_eq!(merge_all(&documents), merge_all(&shuffled));
    }

    #[test]
    fn newest_replace_document_wins(documents in replace_documents()) {
        let graph = merge_all(&documents);
        let newest = documents.iter().max_by_key(|d| d.created_at).unwrap();
        let scope = newest.scope().unwrap();

        prop_assert_eq!(graph.since(scope), newest.created_at);
        match scope {
            GraphScope::Contacts => prop_assert_eq!(&graph.following, &newest.pubkeys()),
            GraphScope::Allowlist => prop_assert_eq!(&graph.allowlist, &newest.pubkeys()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn redelivery_is_a_noop(documents in replace_documents(), pick in any::<prop::sample::Index>()) {
        let mut graph = merge_all(&documents);
        let before = graph.clone();

        let again = pick.get(&documents);
        prop_assert!(!merge_document(&mut graph, again).is_applied());
        prop_assert_eq!(graph, before);
    }

    #[test]
    fn timestamps_never_move_backwards(
        stamps in prop::collection::vec(1u64..1_000, 1..20),
        keys in pubkeys(),
    ) {
        let mut graph = SocialGraph::default();
        let mut high = 0;
        for created_at in stamps {
            merge_document(&mut graph, &document(KIND_MUTE_LIST, None, created_at, &keys));
            high = high.max(created_at);
            prop_assert_eq!(graph.muted_since, high);
        }
    }

    #[test]
    fn ascending_mute_documents_union(lists in prop::collection::vec(pubkeys(), 1..6)) {
        let mut graph = SocialGraph::default();
        for (i, keys) in lists.iter().enumerate() {
            let created_at = u64::try_from(i).unwrap() + 1;
            merge_document(&mut graph, &document(KIND_MUTE_LIST, None, created_at, keys));
        }

        for key in lists.iter().flatten() {
            prop_assert!(graph.is_muted(key), "{key} should be muted");
        }
        let mut unique = graph.muted.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), graph.muted.len(), "no duplicates");
    }
}
