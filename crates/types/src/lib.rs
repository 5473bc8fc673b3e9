//! Core data model, canonical codec and error taxonomy for the Basalt node.
//!
//! Everything that is hashed, signed or persisted is defined here so that
//! all components share one binary representation.

pub mod block;
pub mod codec;
pub mod error;
pub mod keys;
pub mod params;
pub mod primitives;
pub mod transaction;
pub mod validator;

pub use block::{AccountState, Block, BlockHeader, MAX_EXTRA_DATA};
pub use codec::{from_bytes_canonical, to_bytes_canonical, Decode, Encode, Reader, Writer};
pub use error::{
    BlockError, CodecError, ConsensusError, ErrorCode, HostFault, MempoolError, NetworkError,
    StakingError, StateError, StorageError, SyncError, TxError,
};
pub use params::{ChainParams, Genesis, GenesisAccount, GenesisValidator, ParamsError};
pub use primitives::{
    Address, BlsPublicKey, BlsSignature, Ed25519PublicKey, Ed25519Signature, Hash256, PeerId, U256,
};
pub use transaction::{
    ComplianceProof, Log, Receipt, Transaction, TxKind, MAX_TX_DATA,
};
pub use validator::{
    is_placeholder_bls_key, placeholder_bls_key, CommitRecord, ValidatorInfo, ValidatorSet,
    MAX_VALIDATORS,
};
