//! Canonical phase order
//!
//! PRE_TX_BEGIN → START_TX → PRE_HANDLER → HANDLER → POST_HANDLER →
//! OUT_COLLECT → OUT_MASK → END_TX → POST_TX_COMMIT

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named slot in the execution pipeline.
///
/// `Ord` follows execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreTxBegin,
    StartTx,
    PreHandler,
    Handler,
    PostHandler,
    OutCollect,
    OutMask,
    EndTx,
    PostTxCommit,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::PreTxBegin,
        Phase::StartTx,
        Phase::PreHandler,
        Phase::Handler,
        Phase::PostHandler,
        Phase::OutCollect,
        Phase::OutMask,
        Phase::EndTx,
        Phase::PostTxCommit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreTxBegin => "PRE_TX_BEGIN",
            Phase::StartTx => "START_TX",
            Phase::PreHandler => "PRE_HANDLER",
            Phase::Handler => "HANDLER",
            Phase::PostHandler => "POST_HANDLER",
            Phase::OutCollect => "OUT_COLLECT",
            Phase::OutMask => "OUT_MASK",
            Phase::EndTx => "END_TX",
            Phase::PostTxCommit => "POST_TX_COMMIT",
        }
    }

    /// Position in the canonical order
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Whether a failure here happens inside the transaction
    pub fn in_transaction(&self) -> bool {
        *self >= Phase::StartTx && *self <= Phase::EndTx
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
