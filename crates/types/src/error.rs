//! Error taxonomy for the Basalt node.
//!
//! Every subsystem error implements [`ErrorCode`] so the API layer can map
//! failures to stable `{code, message}` pairs without matching on variants.
//! Invariant violations (negative balances, underflow) are not modeled here:
//! those are bugs and abort the process via `panic!`.

use crate::primitives::{Address, Hash256};
use thiserror::Error;

/// Assigns a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// The unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Malformed input at the codec layer. Offending frames are discarded at the
/// edge and never reach consensus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a fixed-width read could complete.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },
    /// A LEB128 encoding used more bytes than the minimal form.
    #[error("non-minimal varint encoding")]
    NonMinimalVarInt,
    /// A LEB128 encoding does not fit in 64 bits.
    #[error("varint does not fit in 64 bits")]
    VarIntOverflow,
    /// A fixed-length field had the wrong number of bytes.
    #[error("length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    /// A decoded length exceeded its cap (checked before allocation).
    #[error("length {len} exceeds cap {max}")]
    OversizedLength { len: u64, max: u64 },
    /// Input remained after a complete decode.
    #[error("{remaining} trailing bytes after decode")]
    TrailingBytes { remaining: usize },
    /// A tag or field value was outside its allowed range.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedEnd { .. } => "CODEC_UNEXPECTED_END",
            Self::NonMinimalVarInt => "CODEC_NON_MINIMAL_VARINT",
            Self::VarIntOverflow => "CODEC_VARINT_OVERFLOW",
            Self::LengthMismatch { .. } => "CODEC_LENGTH_MISMATCH",
            Self::OversizedLength { .. } => "CODEC_OVERSIZED_LENGTH",
            Self::TrailingBytes { .. } => "CODEC_TRAILING_BYTES",
            Self::InvalidValue(_) => "CODEC_INVALID_VALUE",
        }
    }
}

/// Errors from the state trie and state database.
#[derive(Error, Debug)]
pub enum StateError {
    /// The underlying node store failed.
    #[error("state backend error: {0}")]
    Backend(String),
    /// A stored node or account blob failed to decode.
    #[error("state decode error: {0}")]
    Decode(String),
    /// A Merkle proof did not verify against the claimed root.
    #[error("proof did not verify against root {root}")]
    InvalidProof { root: Hash256 },
    /// A referenced trie node is missing from the store.
    #[error("missing trie node {0}")]
    MissingNode(Hash256),
    /// A fork was requested while storage writes were still unflushed.
    #[error("fork requested with unflushed storage writes; compute_state_root first")]
    DirtyFork,
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STATE_BACKEND_ERROR",
            Self::Decode(_) => "STATE_DECODE_ERROR",
            Self::InvalidProof { .. } => "STATE_INVALID_PROOF",
            Self::MissingNode(_) => "STATE_MISSING_NODE",
            Self::DirtyFork => "STATE_DIRTY_FORK",
        }
    }
}

/// Errors from the persistent key-value store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    /// Data on disk failed integrity or decode checks.
    #[error("storage corruption: {0}")]
    Corruption(String),
    /// A required column family is missing from the database.
    #[error("missing column family {0}")]
    MissingColumnFamily(&'static str),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Corruption(_) => "STORAGE_CORRUPTION",
            Self::MissingColumnFamily(_) => "STORAGE_MISSING_CF",
        }
    }
}

/// Transaction validation failures. These reject a transaction at admission
/// or inclusion time; they never abort a block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("wrong chain id: expected {expected}, got {got}")]
    ChainIdMismatch { expected: u32, got: u32 },
    #[error("sender {sender} does not match public key")]
    SenderMismatch { sender: Address },
    #[error("wrong nonce: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: String, available: String },
    #[error("gas limit {got} below intrinsic gas {minimum}")]
    GasLimitTooLow { minimum: u64, got: u64 },
    #[error("max priority fee exceeds max fee")]
    FeeCapBelowPriority,
    #[error("max fee per gas below block base fee")]
    FeeBelowBaseFee,
    #[error("transaction data length {len} exceeds cap {max}")]
    DataTooLarge { len: usize, max: usize },
    #[error("fee arithmetic overflow")]
    Overflow,
    #[error("zero gas limit")]
    ZeroGasLimit,
    #[error("compliance proof rejected: {0}")]
    ComplianceProof(String),
    /// State backend failure surfaced through the transaction pipeline.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for TxError {
    fn code(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "TX_SIGNATURE_INVALID",
            Self::ChainIdMismatch { .. } => "TX_CHAIN_ID_MISMATCH",
            Self::SenderMismatch { .. } => "TX_SENDER_MISMATCH",
            Self::NonceMismatch { .. } => "TX_NONCE_MISMATCH",
            Self::InsufficientBalance { .. } => "TX_INSUFFICIENT_BALANCE",
            Self::GasLimitTooLow { .. } => "TX_GAS_LIMIT_TOO_LOW",
            Self::FeeCapBelowPriority => "TX_FEE_CAP_BELOW_PRIORITY",
            Self::FeeBelowBaseFee => "TX_FEE_BELOW_BASE_FEE",
            Self::DataTooLarge { .. } => "TX_DATA_TOO_LARGE",
            Self::Overflow => "TX_FEE_OVERFLOW",
            Self::ZeroGasLimit => "TX_ZERO_GAS_LIMIT",
            Self::ComplianceProof(_) => "TX_COMPLIANCE_PROOF",
            Self::Internal(_) => "TX_INTERNAL",
        }
    }
}

/// Contract execution faults. Exactly one failure kind crosses the sandbox
/// boundary; the executor reacts by discarding the execution fork.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostFault {
    #[error("out of gas")]
    OutOfGas,
    #[error("call depth limit exceeded")]
    CallDepthExceeded,
    #[error("reentrant call into {0}")]
    Reentrancy(Address),
    #[error("execution deadline exceeded")]
    Timeout,
    #[error("contract reverted: {0}")]
    Revert(String),
    #[error("no contract at {0}")]
    UnknownContract(Address),
    #[error("host storage error: {0}")]
    Storage(String),
    #[error("value transfer failed: {0}")]
    Transfer(String),
}

impl ErrorCode for HostFault {
    fn code(&self) -> &'static str {
        match self {
            Self::OutOfGas => "EXEC_OUT_OF_GAS",
            Self::CallDepthExceeded => "EXEC_CALL_DEPTH",
            Self::Reentrancy(_) => "EXEC_REENTRANCY",
            Self::Timeout => "EXEC_TIMEOUT",
            Self::Revert(_) => "EXEC_REVERT",
            Self::UnknownContract(_) => "EXEC_UNKNOWN_CONTRACT",
            Self::Storage(_) => "EXEC_HOST_STORAGE",
            Self::Transfer(_) => "EXEC_TRANSFER",
        }
    }
}

/// Block validation failures in the chain manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("parent hash mismatch: expected {expected}, got {got}")]
    ParentHashMismatch { expected: Hash256, got: Hash256 },
    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidNumber { expected: u64, got: u64 },
    #[error("timestamp {got} not after parent timestamp {parent}")]
    TimestampNotIncreasing { parent: u64, got: u64 },
    #[error("wrong chain id: expected {expected}, got {got}")]
    ChainIdMismatch { expected: u32, got: u32 },
    #[error("gas used {used} exceeds gas limit {limit}")]
    GasExceedsLimit { used: u64, limit: u64 },
    #[error("block gas limit {got} exceeds configured limit {max}")]
    GasLimitTooHigh { got: u64, max: u64 },
    #[error("base fee mismatch: expected {expected}, got {got}")]
    BaseFeeMismatch { expected: String, got: String },
    #[error("extra data length {len} exceeds cap {max}")]
    ExtraDataTooLarge { len: usize, max: usize },
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
    #[error("state root mismatch: expected {expected}, got {got}")]
    StateRootMismatch { expected: Hash256, got: Hash256 },
    #[error("tx root mismatch: expected {expected}, got {got}")]
    TxRootMismatch { expected: Hash256, got: Hash256 },
    #[error("unknown block {0}")]
    UnknownBlock(Hash256),
}

impl ErrorCode for BlockError {
    fn code(&self) -> &'static str {
        match self {
            Self::ParentHashMismatch { .. } => "BLOCK_PARENT_HASH_MISMATCH",
            Self::InvalidNumber { .. } => "BLOCK_INVALID_NUMBER",
            Self::TimestampNotIncreasing { .. } => "BLOCK_TIMESTAMP_NOT_INCREASING",
            Self::ChainIdMismatch { .. } => "BLOCK_CHAIN_ID_MISMATCH",
            Self::GasExceedsLimit { .. } => "BLOCK_GAS_EXCEEDS_LIMIT",
            Self::GasLimitTooHigh { .. } => "BLOCK_GAS_LIMIT_TOO_HIGH",
            Self::BaseFeeMismatch { .. } => "BLOCK_BASE_FEE_MISMATCH",
            Self::ExtraDataTooLarge { .. } => "BLOCK_EXTRA_DATA_TOO_LARGE",
            Self::UnsupportedVersion(_) => "BLOCK_UNSUPPORTED_VERSION",
            Self::StateRootMismatch { .. } => "BLOCK_STATE_ROOT_MISMATCH",
            Self::TxRootMismatch { .. } => "BLOCK_TX_ROOT_MISMATCH",
            Self::UnknownBlock(_) => "BLOCK_UNKNOWN",
        }
    }
}

/// Mempool admission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    /// The pool is full and the incoming fee does not beat the cheapest
    /// resident transaction.
    #[error("mempool full and fee does not displace any resident transaction")]
    Underpriced,
    #[error("per-sender transaction cap reached")]
    SenderCapReached,
    #[error("transaction already known")]
    AlreadyKnown,
    #[error("nonce {got} already consumed (account nonce {account})")]
    StaleNonce { account: u64, got: u64 },
    #[error(transparent)]
    Invalid(#[from] TxError),
}

impl ErrorCode for MempoolError {
    fn code(&self) -> &'static str {
        match self {
            Self::Underpriced => "MEMPOOL_UNDERPRICED",
            Self::SenderCapReached => "MEMPOOL_SENDER_CAP",
            Self::AlreadyKnown => "MEMPOOL_ALREADY_KNOWN",
            Self::StaleNonce { .. } => "MEMPOOL_STALE_NONCE",
            Self::Invalid(e) => e.code(),
        }
    }
}

/// Staking state mutations that were rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    #[error("stake {got} below minimum {minimum}")]
    BelowMinimumStake { minimum: String, got: String },
    #[error("validator {0} already registered")]
    AlreadyRegistered(Address),
    #[error("unknown validator {0}")]
    UnknownValidator(Address),
    #[error("validator {0} is not active")]
    InactiveValidator(Address),
    #[error("unstake amount exceeds self stake")]
    InsufficientSelfStake,
    #[error("partial unstake would leave stake below the validator minimum")]
    RemainderBelowMinimum,
    #[error("delegation amount exceeds delegated balance")]
    InsufficientDelegation,
    #[error("stake arithmetic overflow")]
    Overflow,
}

impl ErrorCode for StakingError {
    fn code(&self) -> &'static str {
        match self {
            Self::BelowMinimumStake { .. } => "STAKE_BELOW_MINIMUM",
            Self::AlreadyRegistered(_) => "STAKE_ALREADY_REGISTERED",
            Self::UnknownValidator(_) => "STAKE_UNKNOWN_VALIDATOR",
            Self::InactiveValidator(_) => "STAKE_INACTIVE_VALIDATOR",
            Self::InsufficientSelfStake => "STAKE_INSUFFICIENT_SELF",
            Self::RemainderBelowMinimum => "STAKE_REMAINDER_BELOW_MINIMUM",
            Self::InsufficientDelegation => "STAKE_INSUFFICIENT_DELEGATION",
            Self::Overflow => "STAKE_OVERFLOW",
        }
    }
}

/// Consensus message handling failures. Invalid messages from peers are
/// dropped silently at the call site; these errors exist for the caller to
/// decide whether to penalize the peer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("sender is not in the current validator set")]
    NotValidator,
    #[error("proposal from wrong leader: expected {expected}, got {got}")]
    WrongLeader { expected: Address, got: Address },
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("message view {got} does not match round view {current}")]
    ViewMismatch { current: u64, got: u64 },
    #[error("message height {got} does not match round height {current}")]
    HeightMismatch { current: u64, got: u64 },
    #[error("no active round for height {0}")]
    UnknownRound(u64),
    #[error("conflicting proposal for height {height}")]
    DuplicateProposal { height: u64 },
    #[error("quorum certificate bitmap popcount {got} below quorum {quorum}")]
    BitmapBelowQuorum { quorum: usize, got: usize },
    #[error("quorum certificate signer index {0} out of range")]
    BitmapOutOfRange(u32),
    #[error("pipeline already has {0} rounds in flight")]
    PipelineFull(usize),
    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotValidator => "CONSENSUS_NOT_VALIDATOR",
            Self::WrongLeader { .. } => "CONSENSUS_WRONG_LEADER",
            Self::SignatureInvalid => "CONSENSUS_SIGNATURE_INVALID",
            Self::ViewMismatch { .. } => "CONSENSUS_VIEW_MISMATCH",
            Self::HeightMismatch { .. } => "CONSENSUS_HEIGHT_MISMATCH",
            Self::UnknownRound(_) => "CONSENSUS_UNKNOWN_ROUND",
            Self::DuplicateProposal { .. } => "CONSENSUS_DUPLICATE_PROPOSAL",
            Self::BitmapBelowQuorum { .. } => "CONSENSUS_BITMAP_BELOW_QUORUM",
            Self::BitmapOutOfRange(_) => "CONSENSUS_BITMAP_OUT_OF_RANGE",
            Self::PipelineFull(_) => "CONSENSUS_PIPELINE_FULL",
            Self::Crypto(_) => "CONSENSUS_CRYPTO",
        }
    }
}

/// Transport and gossip failures.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("peer is on chain {got}, expected {expected}")]
    ChainMismatch { expected: u32, got: u32 },
    #[error("peer genesis hash does not match ours")]
    GenesisMismatch,
    #[error("frame length {len} exceeds cap {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame read timed out")]
    FrameTimeout,
    #[error("connection limit reached")]
    ConnectionLimit,
    #[error("per-ip connection limit reached")]
    PerIpLimit,
    #[error("frame counter regressed or repeated")]
    NonceReplay,
    #[error("frame failed authentication")]
    AeadFailure,
    #[error("message sender does not match authenticated peer identity")]
    IdentityMismatch,
    #[error("peer is banned")]
    PeerBanned,
    #[error("message timestamp outside the allowed drift window")]
    TimestampDrift,
    #[error("peer disconnected")]
    Disconnected,
    #[error("io error: {0}")]
    Io(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::HandshakeFailed(_) => "NET_HANDSHAKE_FAILED",
            Self::ChainMismatch { .. } => "NET_CHAIN_MISMATCH",
            Self::GenesisMismatch => "NET_GENESIS_MISMATCH",
            Self::FrameTooLarge { .. } => "NET_FRAME_TOO_LARGE",
            Self::FrameTimeout => "NET_FRAME_TIMEOUT",
            Self::ConnectionLimit => "NET_CONNECTION_LIMIT",
            Self::PerIpLimit => "NET_PER_IP_LIMIT",
            Self::NonceReplay => "NET_NONCE_REPLAY",
            Self::AeadFailure => "NET_AEAD_FAILURE",
            Self::IdentityMismatch => "NET_IDENTITY_MISMATCH",
            Self::PeerBanned => "NET_PEER_BANNED",
            Self::TimestampDrift => "NET_TIMESTAMP_DRIFT",
            Self::Disconnected => "NET_DISCONNECTED",
            Self::Io(_) => "NET_IO",
            Self::Codec(e) => e.code(),
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Block-range sync failures. A partial batch failure always rolls back the
/// whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("a sync batch is already in flight")]
    InFlight,
    #[error("sync response sequence {got} does not match in-flight batch {expected}")]
    SequenceMismatch { expected: u64, got: u64 },
    #[error("sync batch failed at block {number}: {reason}")]
    BatchFailed { number: u64, reason: String },
    #[error("sync request timed out")]
    Timeout,
}

impl ErrorCode for SyncError {
    fn code(&self) -> &'static str {
        match self {
            Self::InFlight => "SYNC_IN_FLIGHT",
            Self::SequenceMismatch { .. } => "SYNC_SEQUENCE_MISMATCH",
            Self::BatchFailed { .. } => "SYNC_BATCH_FAILED",
            Self::Timeout => "SYNC_TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_distinct() {
        let codes = [
            CodecError::NonMinimalVarInt.code(),
            TxError::SignatureInvalid.code(),
            ConsensusError::NotValidator.code(),
            StakingError::Overflow.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in codes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(CodecError::NonMinimalVarInt.code(), "CODEC_NON_MINIMAL_VARINT");
    }

    #[test]
    fn mempool_error_forwards_inner_code() {
        let err = MempoolError::Invalid(TxError::SignatureInvalid);
        assert_eq!(err.code(), "TX_SIGNATURE_INVALID");
    }
}
