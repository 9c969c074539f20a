//! In-flight edits.
//!
//! Every edit is one [`PendingEdit`] moving through
//! `Queued → AwaitingLatest → Merging → Sending` and resolving to an
//! [`EditOutcome`] or an error. The caller holds the matching
//! [`EditHandle`].
//!
//! A send whose document lost to a newer one goes back to
//! `AwaitingLatest` for another round.

use tokio::sync::oneshot;

use super::error::{AccountError, AccountResult};
use crate::graph::{EditId, GraphCommit, GraphEdit};
use crate::relay::SubscriptionToken;

/// How an edit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// A document was accepted by at least one relay and state was updated.
    Committed,
    /// Nothing needed to change; nothing was sent.
    Unchanged,
}

/// Caller side of an edit.
#[derive(Debug)]
pub struct EditHandle {
    id: EditId,
    rx: oneshot::Receiver<AccountResult<EditOutcome>>,
}

impl EditHandle {
    /// A handle that is already resolved.
    #[must_use]
    pub fn ready(id: EditId, result: AccountResult<EditOutcome>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { id, rx }
    }

    /// The edit's id.
    #[must_use]
    pub const fn id(&self) -> EditId {
        self.id
    }

    /// Waits for the edit to resolve.
    ///
    /// # Errors
    ///
    /// Returns the edit's failure, or [`AccountError::Abandoned`] if the
    /// store dropped it.
    pub async fn outcome(self) -> AccountResult<EditOutcome> {
        self.rx.await.unwrap_or(Err(AccountError::Abandoned))
    }

    /// Returns the result if the edit already resolved.
    pub fn try_outcome(&mut self) -> Option<AccountResult<EditOutcome>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(AccountError::Abandoned)),
        }
    }
}

/// State to apply once a publish is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// A social-graph scope.
    Graph(GraphCommit),
    /// A liked note id.
    Like(String),
}

/// Where an edit is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditPhase {
    /// Waiting for an earlier edit of the same scope to resolve.
    Queued,
    /// Fetch-before-write query sent; nothing received yet.
    AwaitingLatest {
        /// The query's token.
        token: SubscriptionToken,
    },
    /// Newer documents have been merged; waiting for end of stream.
    Merging {
        /// The query's token.
        token: SubscriptionToken,
        /// Documents merged so far.
        merged: usize,
    },
    /// Document published; waiting for the acknowledgement.
    Sending {
        /// What to apply on success.
        commit: Commit,
    },
}

/// One in-flight edit.
#[derive(Debug)]
pub struct PendingEdit {
    id: EditId,
    edit: Option<GraphEdit>,
    phase: EditPhase,
    rounds: u32,
    responder: oneshot::Sender<AccountResult<EditOutcome>>,
}

impl PendingEdit {
    /// A graph edit that has not sent its fetch query yet.
    #[must_use]
    pub fn queued(id: EditId, edit: GraphEdit) -> (Self, EditHandle) {
        Self::with_phase(id, Some(edit), EditPhase::Queued)
    }

    /// Starts an edit that needs no fetch and is already sending.
    #[must_use]
    pub fn sending(id: EditId, commit: Commit) -> (Self, EditHandle) {
        Self::with_phase(id, None, EditPhase::Sending { commit })
    }

    fn with_phase(id: EditId, edit: Option<GraphEdit>, phase: EditPhase) -> (Self, EditHandle) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                id,
                edit,
                phase,
                rounds: 0,
                responder,
            },
            EditHandle { id, rx },
        )
    }

    /// The edit's id.
    #[must_use]
    pub const fn id(&self) -> EditId {
        self.id
    }

    /// The requested graph change, if this is a graph edit.
    #[must_use]
    pub const fn edit(&self) -> Option<&GraphEdit> {
        self.edit.as_ref()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> &EditPhase {
        &self.phase
    }

    /// Returns true while the edit waits for its turn.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self.phase, EditPhase::Queued)
    }

    /// Fetch rounds started so far.
    #[must_use]
    pub const fn rounds(&self) -> u32 {
        self.rounds
    }

    /// The fetch query's token while the edit is still fetching.
    #[must_use]
    pub const fn token(&self) -> Option<SubscriptionToken> {
        match self.phase {
            EditPhase::AwaitingLatest { token } | EditPhase::Merging { token, .. } => Some(token),
            EditPhase::Queued | EditPhase::Sending { .. } => None,
        }
    }

    /// Moves to `AwaitingLatest` for a new fetch round on `token`.
    pub fn begin_fetch(&mut self, token: SubscriptionToken) {
        self.rounds += 1;
        self.phase = EditPhase::AwaitingLatest { token };
    }

    /// Records that a fetched document was merged.
    pub fn record_merge(&mut self) {
        self.phase = match self.phase {
            EditPhase::AwaitingLatest { token } => EditPhase::Merging { token, merged: 1 },
            EditPhase::Merging { token, merged } => EditPhase::Merging {
                token,
                merged: merged + 1,
            },
            EditPhase::Queued | EditPhase::Sending { .. } => return,
        };
    }

    /// Moves to `Sending`.
    pub fn start_sending(&mut self, commit: Commit) {
        self.phase = EditPhase::Sending { commit };
    }

    /// The commit awaiting acknowledgement, if sending.
    #[must_use]
    pub const fn commit(&self) -> Option<&Commit> {
        match &self.phase {
            EditPhase::Sending { commit } => Some(commit),
            _ => None,
        }
    }

    /// Resolves the edit. A caller that dropped its handle is ignored.
    pub fn resolve(self, result: AccountResult<EditOutcome>) {
        let _ = self.responder.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SubscriptionToken {
        "kith:7".parse().unwrap()
    }

    #[test]
    fn fetch_moves_through_phases() {
        let (mut edit, _handle) = PendingEdit::queued(EditId(1), GraphEdit::Follow("A".into()));
        assert!(edit.is_queued());
        assert_eq!(edit.token(), None);
        edit.record_merge();
        assert!(edit.is_queued());

        edit.begin_fetch(token());
        assert_eq!(edit.phase(), &EditPhase::AwaitingLatest { token: token() });
        assert_eq!(edit.token(), Some(token()));
        assert_eq!(edit.rounds(), 1);

        edit.record_merge();
        edit.record_merge();
        assert_eq!(
            edit.phase(),
            &EditPhase::Merging {
                token: token(),
                merged: 2
            }
        );

        edit.start_sending(Commit::Like("n".into()));
        assert_eq!(edit.token(), None);
        edit.record_merge();
        assert!(matches!(edit.phase(), EditPhase::Sending { .. }));
    }

    #[test]
    fn superseded_send_starts_another_round() {
        let (mut edit, _handle) = PendingEdit::queued(EditId(6), GraphEdit::Follow("A".into()));
        edit.begin_fetch(token());
        edit.start_sending(Commit::Like("n".into()));

        let next: SubscriptionToken = "kith:8".parse().unwrap();
        edit.begin_fetch(next);
        assert_eq!(edit.rounds(), 2);
        assert_eq!(edit.token(), Some(next));
        assert!(edit.commit().is_none());
    }

    #[test]
    fn resolve_reaches_handle() {
        let (edit, mut handle) = PendingEdit::sending(EditId(2), Commit::Like("n".into()));
        assert!(handle.try_outcome().is_none());
        assert_eq!(handle.id(), EditId(2));

        edit.resolve(Ok(EditOutcome::Committed));
        assert!(matches!(handle.try_outcome(), Some(Ok(EditOutcome::Committed))));
    }

    #[test]
    fn dropped_edit_is_abandoned() {
        let (edit, mut handle) = PendingEdit::sending(EditId(3), Commit::Like("n".into()));
        drop(edit);
        assert!(matches!(
            handle.try_outcome(),
            Some(Err(AccountError::Abandoned))
        ));
    }

    #[tokio::test]
    async fn ready_handle_resolves() {
        let handle = EditHandle::ready(EditId(4), Ok(EditOutcome::Unchanged));
        assert_eq!(handle.outcome().await.unwrap(), EditOutcome::Unchanged);
    }

    #[test]
    fn commit_only_when_sending() {
        let (mut edit, _handle) = PendingEdit::queued(EditId(5), GraphEdit::Mute("X".into()));
        edit.begin_fetch(token());
        assert!(edit.commit().is_none());
        assert_eq!(edit.edit(), Some(&GraphEdit::Mute("X".into())));

        edit.start_sending(Commit::Like("n".into()));
        assert_eq!(edit.commit(), Some(&Commit::Like("n".into())));
    }
}
