//! Block assembly.
//!
//! Selection reserves each candidate's full gas limit against the block gas
//! limit; the header records the gas actually used. Transactions that fail
//! validation are dropped from the block, never included as failures — a
//! failed *execution* is included with a failed receipt, a failed
//! *validation* is not a block citizen at all.

use basalt_crypto::{block_hash, transaction_hash};
use basalt_execution::{
    execute_transaction, next_base_fee, BlockEnv, BlockNullifiers, ContractRegistry,
    ProofVerifier, StakingHooks, TxEnv,
};
use basalt_state::{MemoryNodeStore, StateAccess, Trie};
use basalt_types::{
    to_bytes_canonical, Address, Block, BlockHeader, ChainParams, Hash256, Receipt, Transaction,
};
use std::sync::Arc;
use tracing::debug;

/// Root of a trie keyed by little-endian item index; used for both the
/// transaction root and the receipts root.
pub fn ordered_root<I: IntoIterator<Item = Vec<u8>>>(items: I) -> Hash256 {
    let mut trie = Trie::new(MemoryNodeStore::new(), Hash256::ZERO);
    for (index, encoded) in items.into_iter().enumerate() {
        let key = (index as u32).to_le_bytes();
        // A memory-store insert cannot fail.
        trie.insert(&key, encoded).expect("memory trie insert");
    }
    trie.root()
}

/// Canonical receipts root: receipts are hashed with their `block_hash` and
/// `post_state_root` zeroed, because both are only known after the header
/// (which embeds this root) is sealed.
pub fn receipts_root(receipts: &[Receipt]) -> Hash256 {
    ordered_root(receipts.iter().map(|receipt| {
        let mut canonical = receipt.clone();
        canonical.block_hash = Hash256::ZERO;
        canonical.post_state_root = Hash256::ZERO;
        to_bytes_canonical(&canonical)
    }))
}

pub fn transactions_root(transactions: &[Transaction]) -> Hash256 {
    ordered_root(transactions.iter().map(to_bytes_canonical))
}

/// Everything produced by one build: the sealed block, the receipts
/// (backfilled), and the executed fork ready to swap in on finalization.
pub struct BuiltBlock<S> {
    pub block: Block,
    pub block_hash: Hash256,
    pub receipts: Vec<Receipt>,
    pub tx_hashes: Vec<Hash256>,
    pub state: S,
}

/// Assembles and executes a block on a forked state.
///
/// `state` must already be a fork of the canonical database; the caller
/// swaps it in when consensus finalizes the block.
#[allow(clippy::too_many_arguments)]
pub fn build_block<S: StateAccess>(
    mut state: S,
    params: &ChainParams,
    parent: &BlockHeader,
    candidates: Vec<Arc<Transaction>>,
    proposer: Address,
    timestamp_ms: u64,
    registry: &ContractRegistry,
    verifier: &dyn ProofVerifier,
    hooks: &mut dyn StakingHooks,
) -> BuiltBlock<S> {
    let base_fee = next_base_fee(parent.base_fee, parent.gas_used, params);
    let number = parent.number + 1;
    let env = TxEnv {
        params,
        base_fee,
        block: BlockEnv {
            height: number,
            timestamp_ms,
        },
        proposer,
    };

    let mut nullifiers = BlockNullifiers::new();
    let mut included = Vec::new();
    let mut receipts: Vec<Receipt> = Vec::new();
    let mut reserved_gas = 0u64;
    let mut cumulative_gas = 0u64;

    for tx in candidates {
        if reserved_gas.saturating_add(tx.gas_limit) > params.block_gas_limit {
            continue;
        }
        match execute_transaction(
            &mut state,
            &tx,
            &env,
            registry,
            verifier,
            hooks,
            &mut nullifiers,
            cumulative_gas,
            included.len() as u32,
        ) {
            Ok(receipt) => {
                reserved_gas += tx.gas_limit;
                cumulative_gas = receipt.cumulative_gas_used;
                receipts.push(receipt);
                included.push(tx);
            }
            Err(err) => {
                debug!(target: "builder", error = %err, "dropped invalid candidate");
            }
        }
    }
    // Block-scoped nullifiers end with the block.
    nullifiers.clear();

    let transactions: Vec<Transaction> = included.iter().map(|tx| (**tx).clone()).collect();
    let tx_hashes: Vec<Hash256> = transactions.iter().map(transaction_hash).collect();

    let state_root = state
        .compute_state_root()
        .unwrap_or_else(|e| panic!("state root computation failed while building: {e}"));

    let header = BlockHeader {
        number,
        parent_hash: parent_block_hash(parent),
        chain_id: params.chain_id,
        timestamp_ms,
        state_root,
        tx_root: transactions_root(&transactions),
        receipts_root: receipts_root(&receipts),
        gas_used: cumulative_gas,
        gas_limit: params.block_gas_limit,
        base_fee,
        proposer,
        extra_data: Vec::new(),
        protocol_version: params.protocol_version,
    };
    let sealed_hash = block_hash(&header);

    // Backfill: the per-receipt post-state root is the end-of-block root,
    // set exactly once, never per transaction.
    for receipt in &mut receipts {
        receipt.block_hash = sealed_hash;
        receipt.post_state_root = state_root;
    }

    BuiltBlock {
        block: Block {
            header,
            transactions,
            commit_bitmap: 0,
        },
        block_hash: sealed_hash,
        receipts,
        tx_hashes,
        state,
    }
}

fn parent_block_hash(parent: &BlockHeader) -> Hash256 {
    // Genesis' parent hash is the zero sentinel; every other parent is
    // identified by its header hash.
    block_hash(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_crypto::eddsa::{self, SigningKey};
    use basalt_crypto::{derive_address, sign_transaction};
    use basalt_execution::{AllowAllVerifier, NoStaking};
    use basalt_state::InMemoryStateDb;
    use basalt_types::{AccountState, TxKind, U256};

    fn params() -> ChainParams {
        ChainParams::default().validated().unwrap()
    }

    fn genesis_header(params: &ChainParams) -> BlockHeader {
        BlockHeader {
            number: 0,
            parent_hash: Hash256::ZERO,
            chain_id: params.chain_id,
            timestamp_ms: 0,
            state_root: Hash256::ZERO,
            tx_root: Hash256::ZERO,
            receipts_root: Hash256::ZERO,
            gas_used: 0,
            gas_limit: params.block_gas_limit,
            base_fee: U256::one(),
            proposer: Address::ZERO,
            extra_data: vec![],
            protocol_version: params.protocol_version,
        }
    }

    fn funded(state: &mut InMemoryStateDb, balance: u64) -> (SigningKey, Address) {
        let (key, public) = eddsa::generate_keypair();
        let address = derive_address(&public);
        state
            .set_account(
                address,
                AccountState {
                    balance: U256::from(balance),
                    ..Default::default()
                },
            )
            .unwrap();
        (key, address)
    }

    fn transfer(key: &SigningKey, nonce: u64) -> Arc<Transaction> {
        let mut tx = Transaction {
            kind: TxKind::Transfer,
            nonce,
            sender: Address::ZERO,
            to: Address([9; 20]),
            value: U256::from(10u64),
            data: vec![],
            gas_limit: 21_000,
            gas_price: U256::zero(),
            max_fee_per_gas: U256::from(5u64),
            max_priority_fee_per_gas: U256::from(2u64),
            chain_id: 100,
            priority: 0,
            compliance_proofs: vec![],
            signature: basalt_types::Ed25519Signature([0; 64]),
            sender_public_key: basalt_types::Ed25519PublicKey([0; 32]),
        };
        sign_transaction(&mut tx, key);
        Arc::new(tx)
    }

    #[test]
    fn builds_a_block_with_consistent_roots() {
        let p = params();
        let mut state = InMemoryStateDb::new();
        let (key, _) = funded(&mut state, 100_000_000);

        let built = build_block(
            state.fork(),
            &p,
            &genesis_header(&p),
            vec![transfer(&key, 0), transfer(&key, 1)],
            Address([0xaa; 20]),
            1_000,
            &ContractRegistry::new(),
            &AllowAllVerifier,
            &mut NoStaking,
        );

        assert_eq!(built.block.transactions.len(), 2);
        assert_eq!(built.block.header.number, 1);
        assert_eq!(built.block.header.gas_used, 42_000);
        assert_eq!(
            built.block.header.tx_root,
            transactions_root(&built.block.transactions)
        );
        assert_eq!(built.block.header.receipts_root, receipts_root(&built.receipts));

        // Receipts were backfilled with the sealed hash and final root.
        for receipt in &built.receipts {
            assert_eq!(receipt.block_hash, built.block_hash);
            assert_eq!(receipt.post_state_root, built.block.header.state_root);
        }
        // Cumulative gas is monotone.
        assert_eq!(built.receipts[0].cumulative_gas_used, 21_000);
        assert_eq!(built.receipts[1].cumulative_gas_used, 42_000);
    }

    #[test]
    fn invalid_candidates_are_dropped_not_included() {
        let p = params();
        let mut state = InMemoryStateDb::new();
        let (key, _) = funded(&mut state, 100_000_000);
        let (poor_key, _) = funded(&mut state, 1);

        let built = build_block(
            state.fork(),
            &p,
            &genesis_header(&p),
            vec![transfer(&poor_key, 0), transfer(&key, 0)],
            Address([0xaa; 20]),
            1_000,
            &ContractRegistry::new(),
            &AllowAllVerifier,
            &mut NoStaking,
        );
        assert_eq!(built.block.transactions.len(), 1);
        assert_eq!(built.receipts.len(), 1);
        assert!(built.receipts[0].success);
    }

    #[test]
    fn builder_fork_does_not_touch_the_origin_state() {
        let p = params();
        let mut state = InMemoryStateDb::new();
        let (key, sender) = funded(&mut state, 100_000_000);

        let _built = build_block(
            state.fork(),
            &p,
            &genesis_header(&p),
            vec![transfer(&key, 0)],
            Address([0xaa; 20]),
            1_000,
            &ContractRegistry::new(),
            &AllowAllVerifier,
            &mut NoStaking,
        );
        // The origin still sees the pre-block nonce.
        assert_eq!(state.get_account(&sender).unwrap().unwrap().nonce, 0);
    }
}
