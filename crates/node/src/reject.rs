//! Mapping from validation errors to peer-facing reject codes.

use std::error::Error;
use std::fmt;

use dagd_primitives::block::BlockDecodeError;
use dagd_primitives::encoding::DecodeError;
use serde::Serialize;

use crate::block_manager::BlockManagerError;
use crate::chain::{ChainError, ChainRuleCode};
use crate::mempool::{MempoolError, MempoolErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum RejectCode {
    Malformed,
    Invalid,
    Obsolete,
    Duplicate,
    NonStandard,
    Dust,
    InsufficientFee,
    Checkpoint,
}

impl RejectCode {
    /// Wire value carried in reject messages.
    pub fn as_u8(self) -> u8 {
        match self {
            RejectCode::Malformed => 0x01,
            RejectCode::Invalid => 0x10,
            RejectCode::Obsolete => 0x11,
            RejectCode::Duplicate => 0x12,
            RejectCode::NonStandard => 0x40,
            RejectCode::Dust => 0x41,
            RejectCode::InsufficientFee => 0x42,
            RejectCode::Checkpoint => 0x43,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectCode::Malformed => "REJECT_MALFORMED",
            RejectCode::Invalid => "REJECT_INVALID",
            RejectCode::Obsolete => "REJECT_OBSOLETE",
            RejectCode::Duplicate => "REJECT_DUPLICATE",
            RejectCode::NonStandard => "REJECT_NONSTANDARD",
            RejectCode::Dust => "REJECT_DUST",
            RejectCode::InsufficientFee => "REJECT_INSUFFICIENTFEE",
            RejectCode::Checkpoint => "REJECT_CHECKPOINT",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn chain_rule_reject_code(code: ChainRuleCode) -> RejectCode {
    match code {
        ChainRuleCode::Duplicate => RejectCode::Duplicate,
        ChainRuleCode::Obsolete => RejectCode::Obsolete,
        ChainRuleCode::CheckpointMismatch | ChainRuleCode::ForkTooOld => RejectCode::Checkpoint,
        ChainRuleCode::MissingParent
        | ChainRuleCode::BadBlock
        | ChainRuleCode::BadTransaction
        | ChainRuleCode::BadScript
        | ChainRuleCode::SpentOutput => RejectCode::Invalid,
    }
}

pub fn mempool_reject_code(kind: MempoolErrorKind) -> RejectCode {
    match kind {
        MempoolErrorKind::Duplicate => RejectCode::Duplicate,
        MempoolErrorKind::NonStandard => RejectCode::NonStandard,
        MempoolErrorKind::Dust => RejectCode::Dust,
        MempoolErrorKind::InsufficientFee => RejectCode::InsufficientFee,
        MempoolErrorKind::Obsolete => RejectCode::Obsolete,
        MempoolErrorKind::Invalid | MempoolErrorKind::Chain => RejectCode::Invalid,
    }
}

/// Reject code and reason for any error.
///
/// Known error types are classified precisely; anything else falls back to
/// its `source()` chain and finally to `Invalid` with the original text.
pub fn extract_reject_code(err: &(dyn Error + 'static)) -> (RejectCode, String) {
    if let Some(code) = known_reject_code(err) {
        return (code, err.to_string());
    }
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(code) = known_reject_code(inner) {
            return (code, err.to_string());
        }
        source = inner.source();
    }
    (RejectCode::Invalid, err.to_string())
}

fn known_reject_code(err: &(dyn Error + 'static)) -> Option<RejectCode> {
    if let Some(err) = err.downcast_ref::<BlockManagerError>() {
        return match err {
            BlockManagerError::Rule(reject) => Some(reject.code),
            BlockManagerError::Chain(inner) => known_reject_code(inner),
            BlockManagerError::Mempool(inner) => known_reject_code(inner),
            BlockManagerError::Shutdown => None,
        };
    }
    if let Some(err) = err.downcast_ref::<MempoolError>() {
        return Some(mempool_reject_code(err.kind));
    }
    if let Some(err) = err.downcast_ref::<ChainError>() {
        return match err {
            ChainError::Rule { code, .. } => Some(chain_rule_reject_code(*code)),
            ChainError::Storage(_) => None,
        };
    }
    if err.is::<DecodeError>() || err.is::<BlockDecodeError>() {
        return Some(RejectCode::Malformed);
    }
    None
}
