//! Transfer FSM State Definitions
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;

use serde::Serialize;

/// Transfer FSM States
///
/// Terminal states: COMPLETED (40), FAILED (-20).
/// MANUAL_REVIEW (50) is not terminal but is never left automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransferState {
    /// Recorded, not yet validated
    Requested = 0,

    /// Hold placed and persisted; the gateway call may be in flight
    /// (persist-before-call)
    Reserved = 10,

    /// Gateway executed the transfer; debit pending
    ProviderAccepted = 20,

    /// No usable answer from the gateway; we do not know what happened
    ProviderUnknown = 30,

    /// A status check is in progress (held by exactly one reconciler)
    Reconciling = 35,

    /// Terminal: debited and settled
    Completed = 40,

    /// Gateway explicitly refused; hold release pending
    ProviderRejected = -10,

    /// Terminal: nothing was debited
    Failed = -20,

    /// Needs an operator
    ManualReview = 50,
}

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    /// Funds are held for this transfer and the outcome is not settled
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferState::Reserved
                | TransferState::ProviderAccepted
                | TransferState::ProviderRejected
                | TransferState::ProviderUnknown
                | TransferState::Reconciling
        )
    }

    /// States a crashed process can leave behind, picked up by the recovery scan
    pub fn recoverable() -> &'static [TransferState] {
        &[
            TransferState::Requested,
            TransferState::Reserved,
            TransferState::ProviderAccepted,
            TransferState::ProviderRejected,
            TransferState::Reconciling,
        ]
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferState::Requested),
            10 => Some(TransferState::Reserved),
            20 => Some(TransferState::ProviderAccepted),
            30 => Some(TransferState::ProviderUnknown),
            35 => Some(TransferState::Reconciling),
            40 => Some(TransferState::Completed),
            -10 => Some(TransferState::ProviderRejected),
            -20 => Some(TransferState::Failed),
            50 => Some(TransferState::ManualReview),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Requested => "REQUESTED",
            TransferState::Reserved => "RESERVED",
            TransferState::ProviderAccepted => "PROVIDER_ACCEPTED",
            TransferState::ProviderUnknown => "PROVIDER_UNKNOWN",
            TransferState::Reconciling => "RECONCILING",
            TransferState::Completed => "COMPLETED",
            TransferState::ProviderRejected => "PROVIDER_REJECTED",
            TransferState::Failed => "FAILED",
            TransferState::ManualReview => "MANUAL_REVIEW",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferState::from_id(value).ok_or(())
    }
}
