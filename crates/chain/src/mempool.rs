//! The transaction pool.
//!
//! Admission fully validates a transaction against current state. The pool
//! is bounded globally and per sender; when full, a strictly better-paying
//! transaction evicts the cheapest resident one. Per-sender iteration is in
//! strict nonce order — only ordering *between* senders is fee-driven.

use basalt_crypto::{
    derive_address, eddsa, transaction_hash, transaction_signing_payload,
    verify_transaction_signature,
};
use basalt_execution::intrinsic_gas;
use basalt_state::StateAccess;
use basalt_types::transaction::MAX_TX_DATA;
use basalt_types::{
    Address, ChainParams, Ed25519PublicKey, Ed25519Signature, Hash256, MempoolError, Transaction,
    TxError, U256,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MempoolConfig {
    pub max_transactions: usize,
    pub max_per_sender: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_per_sender: 64,
        }
    }
}

/// The fee a transaction bids for ordering and eviction: the fee-market cap
/// when present, otherwise the legacy gas price.
fn fee_key(tx: &Transaction) -> U256 {
    tx.max_fee_per_gas.max(tx.gas_price)
}

#[derive(Default)]
struct PoolInner {
    by_hash: HashMap<Hash256, Arc<Transaction>>,
    /// Strict nonce order per sender.
    by_sender: HashMap<Address, BTreeMap<u64, Hash256>>,
}

impl PoolInner {
    fn remove(&mut self, hash: &Hash256) -> Option<Arc<Transaction>> {
        let tx = self.by_hash.remove(hash)?;
        if let Some(nonces) = self.by_sender.get_mut(&tx.sender) {
            nonces.remove(&tx.nonce);
            if nonces.is_empty() {
                self.by_sender.remove(&tx.sender);
            }
        }
        Some(tx)
    }

    fn cheapest(&self) -> Option<(Hash256, U256)> {
        self.by_hash
            .iter()
            .map(|(hash, tx)| (*hash, fee_key(tx)))
            .min_by(|a, b| a.1.cmp(&b.1))
    }
}

pub struct Mempool {
    config: MempoolConfig,
    inner: Mutex<PoolInner>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.inner.lock().by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<Arc<Transaction>> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    /// Full admission validation. Unlike block inclusion, any nonce at or
    /// above the account's current nonce is admissible. `check_signature`
    /// is false on the batch path, where the signature was already covered
    /// by an aggregate verification.
    fn validate<S: StateAccess>(
        &self,
        state: &S,
        tx: &Transaction,
        params: &ChainParams,
        check_signature: bool,
    ) -> Result<(), MempoolError> {
        if tx.gas_limit == 0 {
            return Err(TxError::ZeroGasLimit.into());
        }
        if tx.chain_id != params.chain_id {
            return Err(TxError::ChainIdMismatch {
                expected: params.chain_id,
                got: tx.chain_id,
            }
            .into());
        }
        if tx.data.len() > MAX_TX_DATA {
            return Err(TxError::DataTooLarge {
                len: tx.data.len(),
                max: MAX_TX_DATA,
            }
            .into());
        }
        if tx.max_priority_fee_per_gas > tx.max_fee_per_gas {
            return Err(TxError::FeeCapBelowPriority.into());
        }
        if check_signature {
            verify_transaction_signature(tx).map_err(|_| TxError::SignatureInvalid)?;
        } else if derive_address(&tx.sender_public_key) != tx.sender {
            // The aggregate check covered the signature but not the
            // sender's binding to the embedded key.
            return Err(TxError::SenderMismatch { sender: tx.sender }.into());
        }
        let intrinsic = intrinsic_gas(tx);
        if tx.gas_limit < intrinsic {
            return Err(TxError::GasLimitTooLow {
                minimum: intrinsic,
                got: tx.gas_limit,
            }
            .into());
        }

        let account = state
            .get_account(&tx.sender)
            .map_err(|e| TxError::Internal(e.to_string()))?
            .unwrap_or_default();
        if tx.nonce < account.nonce {
            return Err(MempoolError::StaleNonce {
                account: account.nonce,
                got: tx.nonce,
            });
        }
        let max_gas_cost = U256::from(tx.gas_limit)
            .checked_mul(tx.max_fee_per_gas)
            .ok_or(TxError::Overflow)?;
        let required = tx.value.checked_add(max_gas_cost).ok_or(TxError::Overflow)?;
        if account.balance < required {
            return Err(TxError::InsufficientBalance {
                required: required.to_string(),
                available: account.balance.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Admits a transaction, evicting the cheapest resident transaction if
    /// the pool is full and the newcomer pays strictly more.
    pub fn insert<S: StateAccess>(
        &self,
        state: &S,
        tx: Transaction,
        params: &ChainParams,
    ) -> Result<Hash256, MempoolError> {
        self.insert_validated(state, tx, params, true)
    }

    /// Admits a batch of announced transactions.
    ///
    /// All signatures are checked in one aggregate Ed25519 verification;
    /// only when the aggregate fails does each transaction fall back to an
    /// individual check, so one bad signature cannot poison the rest of
    /// the batch.
    pub fn insert_batch<S: StateAccess>(
        &self,
        state: &S,
        txs: Vec<Transaction>,
        params: &ChainParams,
    ) -> Vec<Result<Hash256, MempoolError>> {
        let payloads: Vec<Vec<u8>> = txs.iter().map(transaction_signing_payload).collect();
        let messages: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let signatures: Vec<Ed25519Signature> = txs.iter().map(|tx| tx.signature).collect();
        let keys: Vec<Ed25519PublicKey> = txs.iter().map(|tx| tx.sender_public_key).collect();
        let batch_ok = eddsa::verify_batch(&messages, &signatures, &keys).unwrap_or(false);

        txs.into_iter()
            .map(|tx| self.insert_validated(state, tx, params, !batch_ok))
            .collect()
    }

    fn insert_validated<S: StateAccess>(
        &self,
        state: &S,
        tx: Transaction,
        params: &ChainParams,
        check_signature: bool,
    ) -> Result<Hash256, MempoolError> {
        self.validate(state, &tx, params, check_signature)?;
        let hash = transaction_hash(&tx);

        let mut inner = self.inner.lock();
        if inner.by_hash.contains_key(&hash) {
            return Err(MempoolError::AlreadyKnown);
        }
        let sender_count = inner
            .by_sender
            .get(&tx.sender)
            .map(BTreeMap::len)
            .unwrap_or(0);
        if sender_count >= self.config.max_per_sender {
            return Err(MempoolError::SenderCapReached);
        }

        if inner.by_hash.len() >= self.config.max_transactions {
            match inner.cheapest() {
                Some((victim, victim_fee)) if fee_key(&tx) > victim_fee => {
                    inner.remove(&victim);
                    debug!(target: "mempool", evicted = %victim, "evicted cheapest transaction");
                }
                _ => return Err(MempoolError::Underpriced),
            }
        }

        // A replacement for the same (sender, nonce) must also pay strictly
        // more than what it replaces.
        if let Some(existing) = inner
            .by_sender
            .get(&tx.sender)
            .and_then(|nonces| nonces.get(&tx.nonce))
            .copied()
        {
            let existing_fee = inner
                .by_hash
                .get(&existing)
                .map(|tx| fee_key(tx))
                .unwrap_or_default();
            if fee_key(&tx) <= existing_fee {
                return Err(MempoolError::Underpriced);
            }
            inner.remove(&existing);
        }

        inner
            .by_sender
            .entry(tx.sender)
            .or_default()
            .insert(tx.nonce, hash);
        inner.by_hash.insert(hash, Arc::new(tx));
        Ok(hash)
    }

    /// Drops transactions whose nonce is already consumed or whose fee can
    /// no longer cover the current base fee.
    pub fn prune_stale<S: StateAccess>(&self, state: &S, base_fee: U256) {
        let mut inner = self.inner.lock();
        let doomed: Vec<Hash256> = inner
            .by_hash
            .iter()
            .filter(|(_, tx)| {
                let account_nonce = state
                    .get_account(&tx.sender)
                    .ok()
                    .flatten()
                    .map(|acc| acc.nonce)
                    .unwrap_or(0);
                tx.nonce < account_nonce || tx.effective_tip(base_fee).is_none()
            })
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &doomed {
            inner.remove(hash);
        }
        if !doomed.is_empty() {
            debug!(target: "mempool", pruned = doomed.len(), "pruned stale transactions");
        }
    }

    /// Removes transactions included in a block.
    pub fn remove_included(&self, hashes: &[Hash256]) {
        let mut inner = self.inner.lock();
        for hash in hashes {
            inner.remove(hash);
        }
    }

    /// Selects candidates for a block: per sender, a nonce-contiguous run
    /// starting at the account nonce; between senders, highest effective
    /// tip first; bounded by the sum of *reserved* gas limits.
    pub fn select<S: StateAccess>(
        &self,
        state: &S,
        base_fee: U256,
        block_gas_limit: u64,
    ) -> Vec<Arc<Transaction>> {
        struct Candidate {
            tip: U256,
            sender: Address,
        }
        impl PartialEq for Candidate {
            fn eq(&self, other: &Self) -> bool {
                self.tip == other.tip && self.sender == other.sender
            }
        }
        impl Eq for Candidate {}
        impl PartialOrd for Candidate {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Candidate {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                // Max-heap by tip; the address breaks ties determinis-
                // tically.
                self.tip
                    .cmp(&other.tip)
                    .then_with(|| self.sender.cmp(&other.sender))
            }
        }

        let inner = self.inner.lock();

        // Per-sender cursors over contiguous nonce runs.
        let mut cursors: HashMap<Address, std::vec::IntoIter<Arc<Transaction>>> = HashMap::new();
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut next_tx: HashMap<Address, Arc<Transaction>> = HashMap::new();

        for (sender, nonces) in &inner.by_sender {
            let start_nonce = state
                .get_account(sender)
                .ok()
                .flatten()
                .map(|acc| acc.nonce)
                .unwrap_or(0);
            let mut run = Vec::new();
            let mut expected = start_nonce;
            for (nonce, hash) in nonces.range(start_nonce..) {
                if *nonce != expected {
                    break;
                }
                let Some(tx) = inner.by_hash.get(hash) else {
                    break;
                };
                if tx.effective_tip(base_fee).is_none() {
                    break;
                }
                run.push(tx.clone());
                expected += 1;
            }
            let mut iter = run.into_iter();
            if let Some(first) = iter.next() {
                heap.push(Candidate {
                    tip: first.effective_tip(base_fee).unwrap_or_default(),
                    sender: *sender,
                });
                next_tx.insert(*sender, first);
                cursors.insert(*sender, iter);
            }
        }

        let mut selected = Vec::new();
        let mut reserved_gas = 0u64;
        while let Some(Candidate { sender, .. }) = heap.pop() {
            let Some(tx) = next_tx.remove(&sender) else {
                continue;
            };
            if reserved_gas.saturating_add(tx.gas_limit) > block_gas_limit {
                // This sender's run cannot continue; later nonces would be
                // non-contiguous without this transaction.
                continue;
            }
            reserved_gas += tx.gas_limit;
            selected.push(tx);
            if let Some(next) = cursors.get_mut(&sender).and_then(Iterator::next) {
                heap.push(Candidate {
                    tip: next.effective_tip(base_fee).unwrap_or_default(),
                    sender,
                });
                next_tx.insert(sender, next);
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_crypto::eddsa::{self, SigningKey};
    use basalt_crypto::{derive_address, sign_transaction};
    use basalt_state::InMemoryStateDb;
    use basalt_types::{AccountState, TxKind};

    fn params() -> ChainParams {
        ChainParams::default().validated().unwrap()
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

    fn tx_with(key: &SigningKey, nonce: u64, fee: u64) -> Transaction {
        let mut tx = Transaction {
            kind: TxKind::Transfer,
            nonce,
            sender: Address::ZERO,
            to: Address([9; 20]),
            value: U256::from(1u64),
            data: vec![],
            gas_limit: 21_000,
            gas_price: U256::zero(),
            max_fee_per_gas: U256::from(fee),
            max_priority_fee_per_gas: U256::from(fee),
            chain_id: 100,
            priority: 0,
            compliance_proofs: vec![],
            signature: basalt_types::Ed25519Signature([0; 64]),
            sender_public_key: basalt_types::Ed25519PublicKey([0; 32]),
        };
        sign_transaction(&mut tx, key);
        tx
    }

    #[test]
    fn admission_validates_against_state() {
        let mut state = InMemoryStateDb::new();
        let (key, _) = funded(&mut state, 100);
        let pool = Mempool::new(MempoolConfig::default());

        // Balance 100 cannot cover value + gas.
        let err = pool.insert(&state, tx_with(&key, 0, 1), &params()).unwrap_err();
        assert!(matches!(err, MempoolError::Invalid(TxError::InsufficientBalance { .. })));
        assert!(pool.is_empty());
    }

    #[test]
    fn batch_admission_verifies_signatures_in_aggregate() {
        let mut state = InMemoryStateDb::new();
        let (key_a, _) = funded(&mut state, 100_000_000);
        let (key_b, _) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());
        let p = params();

        let results = pool.insert_batch(
            &state,
            vec![tx_with(&key_a, 0, 5), tx_with(&key_b, 0, 5)],
            &p,
        );
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn batch_with_one_bad_signature_admits_the_rest() {
        let mut state = InMemoryStateDb::new();
        let (key_a, _) = funded(&mut state, 100_000_000);
        let (key_b, _) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());
        let p = params();

        let good = tx_with(&key_a, 0, 5);
        let mut forged = tx_with(&key_b, 0, 5);
        forged.signature = basalt_types::Ed25519Signature([0x77; 64]);

        // The aggregate fails, the fallback isolates the forgery.
        let results = pool.insert_batch(&state, vec![good, forged], &p);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(MempoolError::Invalid(TxError::SignatureInvalid))
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn batch_path_still_checks_sender_binding() {
        let mut state = InMemoryStateDb::new();
        let (key_a, _) = funded(&mut state, 100_000_000);
        let (key_b, _) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());
        let p = params();

        // A transaction whose signature is valid for its embedded key but
        // whose sender field belongs to someone else. Re-signing keeps the
        // aggregate green, so only the binding check can catch it.
        let mut stolen = tx_with(&key_a, 0, 5);
        stolen.sender = derive_address(&basalt_types::Ed25519PublicKey(
            key_b.verifying_key().to_bytes(),
        ));
        let payload = transaction_signing_payload(&stolen);
        stolen.signature = eddsa::sign(&key_a, &payload);

        let results = pool.insert_batch(&state, vec![stolen], &p);
        assert!(matches!(
            results[0],
            Err(MempoolError::Invalid(TxError::SenderMismatch { .. }))
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicate_and_stale_nonces_are_rejected() {
        let mut state = InMemoryStateDb::new();
        let (key, addr) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());

        pool.insert(&state, tx_with(&key, 0, 5), &params()).unwrap();
        assert!(matches!(
            pool.insert(&state, tx_with(&key, 0, 5), &params()),
            Err(MempoolError::AlreadyKnown)
        ));

        // Advance the account nonce; nonce 0 becomes stale.
        let mut acc = state.get_account(&addr).unwrap().unwrap();
        acc.nonce = 1;
        state.set_account(addr, acc).unwrap();
        assert!(matches!(
            pool.insert(&state, tx_with(&key, 0, 50), &params()),
            Err(MempoolError::StaleNonce { .. })
        ));
    }

    #[test]
    fn eviction_under_pressure_prefers_higher_fee() {
        let mut state = InMemoryStateDb::new();
        let pool = Mempool::new(MempoolConfig {
            max_transactions: 3,
            max_per_sender: 8,
        });
        let p = params();

        let mut keys = Vec::new();
        for _ in 0..5 {
            keys.push(funded(&mut state, 100_000_000).0);
        }
        for key in keys.iter().take(3) {
            pool.insert(&state, tx_with(key, 0, 1), &p).unwrap();
        }
        assert_eq!(pool.len(), 3);

        // A higher-fee transaction displaces one resident.
        pool.insert(&state, tx_with(&keys[3], 0, 2), &p).unwrap();
        assert_eq!(pool.len(), 3);

        // An equal-fee transaction does not.
        assert!(matches!(
            pool.insert(&state, tx_with(&keys[4], 0, 1), &p),
            Err(MempoolError::Underpriced)
        ));
    }

    #[test]
    fn per_sender_cap_is_enforced() {
        let mut state = InMemoryStateDb::new();
        let (key, _) = funded(&mut state, u64::MAX / 2);
        let pool = Mempool::new(MempoolConfig {
            max_transactions: 100,
            max_per_sender: 2,
        });
        let p = params();
        pool.insert(&state, tx_with(&key, 0, 5), &p).unwrap();
        pool.insert(&state, tx_with(&key, 1, 5), &p).unwrap();
        assert!(matches!(
            pool.insert(&state, tx_with(&key, 2, 5), &p),
            Err(MempoolError::SenderCapReached)
        ));
    }

    #[test]
    fn selection_is_nonce_ordered_within_sender_and_fee_ordered_between() {
        let mut state = InMemoryStateDb::new();
        let (cheap_key, cheap_addr) = funded(&mut state, 100_000_000);
        let (rich_key, rich_addr) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());
        let p = params();

        // Insert out of nonce order; selection must restore it.
        pool.insert(&state, tx_with(&cheap_key, 1, 3), &p).unwrap();
        pool.insert(&state, tx_with(&cheap_key, 0, 3), &p).unwrap();
        pool.insert(&state, tx_with(&rich_key, 0, 9), &p).unwrap();

        let selected = pool.select(&state, U256::one(), 30_000_000);
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].sender, rich_addr);
        let cheap: Vec<u64> = selected
            .iter()
            .filter(|tx| tx.sender == cheap_addr)
            .map(|tx| tx.nonce)
            .collect();
        assert_eq!(cheap, vec![0, 1]);
    }

    #[test]
    fn selection_skips_nonce_gaps() {
        let mut state = InMemoryStateDb::new();
        let (key, _) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());
        let p = params();

        pool.insert(&state, tx_with(&key, 0, 5), &p).unwrap();
        pool.insert(&state, tx_with(&key, 2, 5), &p).unwrap();

        let selected = pool.select(&state, U256::one(), 30_000_000);
        // Nonce 2 is unreachable without nonce 1.
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].nonce, 0);
    }

    #[test]
    fn prune_removes_consumed_nonces_and_under_base_fee() {
        let mut state = InMemoryStateDb::new();
        let (key, addr) = funded(&mut state, 100_000_000);
        let pool = Mempool::new(MempoolConfig::default());
        let p = params();

        pool.insert(&state, tx_with(&key, 0, 5), &p).unwrap();
        pool.insert(&state, tx_with(&key, 1, 5), &p).unwrap();

        let mut acc = state.get_account(&addr).unwrap().unwrap();
        acc.nonce = 1;
        state.set_account(addr, acc).unwrap();

        // Nonce 0 is consumed; a base fee of 10 strands the rest.
        pool.prune_stale(&state, U256::from(10u64));
        assert!(pool.is_empty());
    }
}
