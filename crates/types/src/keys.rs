//! Key layouts for the flat `state` column family.
//!
//! Account records live under `0x01 || address`; contract storage slots
//! under `0x02 || address || slot`. Keeping the layouts here ensures the
//! state engine and the persistent store agree byte-for-byte.

use crate::primitives::{Address, Hash256};

pub const ACCOUNT_KEY_PREFIX: u8 = 0x01;
pub const STORAGE_KEY_PREFIX: u8 = 0x02;

/// `0x01 || 20-byte address`.
pub fn account_key(address: &Address) -> [u8; 21] {
    let mut key = [0u8; 21];
    key[0] = ACCOUNT_KEY_PREFIX;
    key[1..].copy_from_slice(&address.0);
    key
}

/// `0x02 || 20-byte address || 32-byte slot`.
pub fn storage_key(address: &Address, slot: &Hash256) -> [u8; 53] {
    let mut key = [0u8; 53];
    key[0] = STORAGE_KEY_PREFIX;
    key[1..21].copy_from_slice(&address.0);
    key[21..].copy_from_slice(&slot.0);
    key
}

/// The `0x02 || address` prefix selecting every storage slot of an account.
pub fn storage_prefix(address: &Address) -> [u8; 21] {
    let mut key = [0u8; 21];
    key[0] = STORAGE_KEY_PREFIX;
    key[1..].copy_from_slice(&address.0);
    key
}
