//! The node coordinator: owns canonical state and wires consensus,
//! execution, the mempool, staking and persistence together.
//!
//! The finalization pipeline runs in a fixed order — execute on a fork,
//! check the state root, append to the chain, swap the fork in, persist
//! one atomic batch, then the epoch bookkeeping — so the chain tip and the
//! canonical state can never diverge, even across a crash.

use crate::error::NodeError;
use crate::genesis::{build_genesis, GenesisState};
use crate::sync::SyncGuard;
use basalt_chain::{build_block, BuiltBlock, ChainManager, Mempool, MempoolConfig};
use basalt_consensus::{
    Action, BftEngine, ConsensusMessage, EquivocationTracker, Proposal,
};
use basalt_crypto::{block_hash, transaction_hash, ValidatorKeys};
use basalt_execution::{
    execute_block, BlockEnv, ContractRegistry, ProofVerifier, TxEnv, STAKING_ESCROW,
};
use basalt_network::wire::{Envelope, Payload, MAX_SYNC_BLOCKS};
use basalt_staking::{EpochManager, RegistrySnapshot, StakingRegistry, StakingService};
use basalt_state::{StateAccess, StateHandle, TrieStateDb};
use basalt_storage::{
    BlockStore, Database, MetaStore, ReceiptStore, RocksNodeStore, TipRecord,
};
use basalt_types::{
    from_bytes_canonical, to_bytes_canonical, Block, ChainParams, CommitRecord, Genesis, Hash256,
    PeerId, Receipt, Transaction,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A message the node must put on the wire.
#[derive(Debug, Clone)]
pub enum Outbound {
    ToPeer(PeerId, Payload),
    Broadcast(Payload),
    /// A consensus wire action; the service delivers it through its
    /// [`basalt_consensus::ConsensusOutbound`] implementation.
    Consensus(Action),
}

pub struct Coordinator {
    pub params: ChainParams,
    state: StateHandle,
    chain: ChainManager,
    pub mempool: Mempool,
    db: Arc<Database>,
    blocks: BlockStore,
    receipts: ReceiptStore,
    meta: MetaStore,
    pub registry: Arc<StakingRegistry>,
    epochs: EpochManager,
    pub engine: BftEngine,
    evidence: Mutex<EquivocationTracker>,
    contracts: ContractRegistry,
    verifier: Arc<dyn ProofVerifier>,
    pub sync: SyncGuard,
    pub genesis_hash: Hash256,
    keys: Option<Arc<ValidatorKeys>>,
    /// Finalized-block stream for the API layer.
    block_events: tokio::sync::broadcast::Sender<Arc<Block>>,
}

impl Coordinator {
    /// Opens or creates the chain in `db` and wires every subsystem.
    pub fn bootstrap(
        genesis: &Genesis,
        db: Arc<Database>,
        keys: Option<Arc<ValidatorKeys>>,
        contracts: ContractRegistry,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Result<Self, NodeError> {
        let params = genesis.params.clone();
        let node_store = RocksNodeStore::new(db.clone());
        let blocks = BlockStore::new(db.clone());
        let receipts = ReceiptStore::new(db.clone());
        let meta = MetaStore::new(db.clone());

        let (state, registry, tip_header, genesis_hash) = match meta.tip()? {
            Some(tip) => {
                // Warm start: resume at the persisted tip.
                let genesis_hash = meta
                    .genesis_hash()?
                    .ok_or_else(|| NodeError::Corrupt("tip without genesis hash".into()))?;
                let header = blocks
                    .by_number(tip.number)?
                    .ok_or_else(|| NodeError::Corrupt("tip block missing".into()))?
                    .header
                    .clone();
                let state = TrieStateDb::open(node_store.clone(), tip.state_root);
                let registry =
                    StakingRegistry::new(params.min_validator_stake, params.unbonding_blocks);
                let snapshot_bytes = meta
                    .staking_snapshot()?
                    .ok_or_else(|| NodeError::Corrupt("staking snapshot missing".into()))?;
                let snapshot: RegistrySnapshot = from_bytes_canonical(&snapshot_bytes)
                    .map_err(|e| NodeError::Corrupt(e.to_string()))?;
                registry.restore(snapshot);
                info!(target: "node", number = tip.number, "resuming at persisted tip");
                (state, registry, header, genesis_hash)
            }
            None => {
                // Cold start: materialize and persist genesis.
                let GenesisState {
                    header,
                    hash,
                    state,
                    registry,
                    ..
                } = build_genesis(genesis, node_store.clone())?;

                let genesis_block = Block {
                    header: header.clone(),
                    transactions: Vec::new(),
                    commit_bitmap: 0,
                };
                let mut batch = db.batch();
                for (node_hash, bytes) in state.take_trie_delta() {
                    batch.put(basalt_storage::CF_TRIE_NODES, &node_hash.0, &bytes)?;
                }
                meta.stage_flat_writes(&mut batch, &state.take_flat_writes())?;
                blocks.stage_block(&mut batch, hash, &genesis_block)?;
                meta.stage_tip(
                    &mut batch,
                    &TipRecord {
                        number: 0,
                        hash,
                        state_root: header.state_root,
                    },
                )?;
                meta.stage_staking_snapshot(
                    &mut batch,
                    &to_bytes_canonical(&registry.snapshot()),
                )?;
                batch.commit()?;
                meta.set_genesis_hash(hash)?;
                info!(target: "node", %hash, "genesis written");
                (state, registry, header, hash)
            }
        };

        let mut state = state;
        state.rebase();
        let epochs = EpochManager::new(params.clone());
        let engine = BftEngine::pipelined(params.chain_id, params.max_pipeline_depth, keys.clone());
        let tip_number = tip_header.number;
        let epoch = epochs.epoch_of(tip_number.saturating_add(1));
        let validator_set =
            epochs.rebuild_validator_set(epoch, &registry, &Default::default());
        engine.begin_epoch(validator_set, tip_number + 1);

        Ok(Self {
            chain: ChainManager::new(params.clone(), tip_header),
            state: StateHandle::new(state),
            mempool: Mempool::new(MempoolConfig::default()),
            db,
            blocks,
            receipts,
            meta,
            registry,
            epochs,
            engine,
            evidence: Mutex::new(EquivocationTracker::new()),
            contracts,
            verifier,
            sync: SyncGuard::new(),
            genesis_hash,
            params,
            keys,
            block_events: tokio::sync::broadcast::channel(64).0,
        })
    }

    /// Core API surface: a stream of finalized blocks, in height order.
    pub fn subscribe_blocks(&self) -> tokio::sync::broadcast::Receiver<Arc<Block>> {
        self.block_events.subscribe()
    }

    pub fn tip_number(&self) -> u64 {
        self.chain.tip_number()
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn block_store(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn receipt_store(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// A throwaway copy of the staking registry for speculative execution
    /// (proposal building, read-only calls).
    fn scratch_registry(&self) -> Arc<StakingRegistry> {
        let scratch = StakingRegistry::new(
            self.params.min_validator_stake,
            self.params.unbonding_blocks,
        );
        scratch.restore(self.registry.snapshot());
        scratch
    }

    /// Core API surface: admit a transaction into the mempool.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, NodeError> {
        let hash = self
            .state
            .read(|db| self.mempool.insert(db, tx, &self.params))?;
        Ok(hash)
    }

    /// Core API surface: read-only call against a forked state; nothing is
    /// ever committed.
    pub fn call_readonly(&self, tx: &Transaction) -> Result<Receipt, NodeError> {
        let mut fork = self.state.fork()?;
        let tip = self.chain.tip();
        let env = TxEnv {
            params: &self.params,
            base_fee: tip.header.base_fee,
            block: BlockEnv {
                height: tip.header.number + 1,
                timestamp_ms: tip.header.timestamp_ms + self.params.block_time_ms,
            },
            proposer: tip.header.proposer,
        };
        let mut hooks = StakingService::new(self.scratch_registry());
        let mut nullifiers = basalt_execution::BlockNullifiers::new();
        let receipt = basalt_execution::execute_transaction(
            &mut fork,
            tx,
            &env,
            &self.contracts,
            &*self.verifier,
            &mut hooks,
            &mut nullifiers,
            0,
            0,
        )?;
        Ok(receipt)
    }

    /// Builds and proposes the next block if this node leads the round.
    pub fn try_propose(&self, timestamp_ms: u64) -> Result<Vec<Outbound>, NodeError> {
        let Some(keys) = &self.keys else {
            return Ok(Vec::new());
        };
        let height = self.engine.next_height();
        let tip = self.chain.tip();
        if tip.header.number + 1 != height {
            // The pipeline is ahead of execution; nothing to propose yet.
            return Ok(Vec::new());
        }
        let set = self.engine.validators();
        if !basalt_consensus::is_leader(&set, height, self.engine.current_view(), &keys.address())
        {
            return Ok(Vec::new());
        }

        let base_fee = basalt_execution::next_base_fee(
            tip.header.base_fee,
            tip.header.gas_used,
            &self.params,
        );
        let candidates = self
            .state
            .read(|db| self.mempool.select(db, base_fee, self.params.block_gas_limit));
        let fork = self.state.fork()?;
        // The speculative build runs staking hooks against a scratch copy
        // of the registry; the real mutations happen on finalization.
        let mut hooks = StakingService::new(self.scratch_registry());
        let timestamp_ms = timestamp_ms.max(tip.header.timestamp_ms + 1);
        let BuiltBlock { block, .. } = build_block(
            fork,
            &self.params,
            &tip.header,
            candidates,
            keys.address(),
            timestamp_ms,
            &self.contracts,
            &*self.verifier,
            &mut hooks,
        );
        // The proposal's fork is discarded; the canonical re-execution
        // happens when consensus finalizes the block.
        let actions = self.engine.start_round(block)?;
        self.dispatch_engine_actions(actions)
    }

    /// Routes one authenticated envelope. The caller has already matched
    /// `envelope.sender` against the connection's authenticated peer and
    /// validated the timestamp.
    pub fn handle_payload(
        &self,
        sender: PeerId,
        payload: Payload,
    ) -> Result<Vec<Outbound>, NodeError> {
        match payload {
            Payload::Consensus(message) => self.handle_consensus(sender, message),
            Payload::TxAnnounce(txs) => {
                // Announced batches verify their signatures in aggregate.
                let results = self
                    .state
                    .read(|db| self.mempool.insert_batch(db, txs, &self.params));
                for err in results.into_iter().filter_map(Result::err) {
                    match err {
                        basalt_types::MempoolError::AlreadyKnown => {}
                        err => debug!(target: "node", %err, "announced transaction rejected"),
                    }
                }
                Ok(Vec::new())
            }
            Payload::TxPull(hashes) => {
                let mut found = Vec::new();
                for hash in hashes {
                    if let Some(tx) = self.mempool.get(&hash) {
                        found.push((*tx).clone());
                    }
                }
                Ok(vec![Outbound::ToPeer(sender, Payload::TxAnnounce(found))])
            }
            Payload::BlockRequestByHash(hash) => {
                let block = self.blocks.by_hash(&hash)?;
                Ok(vec![Outbound::ToPeer(sender, Payload::BlockResponse(block))])
            }
            Payload::BlockRequestByNumber(number) => {
                let block = self.blocks.by_number(number)?.map(|b| (*b).clone());
                Ok(vec![Outbound::ToPeer(sender, Payload::BlockResponse(block))])
            }
            Payload::SyncRequest {
                from_number,
                max_blocks,
                sequence,
            } => {
                let mut batch = Vec::new();
                let limit = (max_blocks as usize).min(MAX_SYNC_BLOCKS);
                for number in from_number..from_number.saturating_add(limit as u64) {
                    match self.blocks.by_number(number)? {
                        Some(block) => batch.push((*block).clone()),
                        None => break,
                    }
                }
                Ok(vec![Outbound::ToPeer(
                    sender,
                    Payload::SyncResponse {
                        sequence,
                        blocks: batch,
                    },
                )])
            }
            Payload::SyncResponse { sequence, blocks } => {
                self.apply_sync_response(sequence, blocks)?;
                Ok(Vec::new())
            }
            Payload::BlockResponse(_) => Ok(Vec::new()),
            // Discovery and gossip control are the service layer's job.
            other => {
                debug!(target: "node", ?other, "payload not routed by the coordinator");
                Ok(Vec::new())
            }
        }
    }

    /// Consensus-family messages pass a validator-set membership check at
    /// the edge: unknown peers never reach the engine.
    fn handle_consensus(
        &self,
        sender: PeerId,
        message: ConsensusMessage,
    ) -> Result<Vec<Outbound>, NodeError> {
        let set = self.engine.validators();
        if set.by_peer(&sender).is_none() {
            debug!(target: "node", peer = %sender, "consensus message from non-validator dropped");
            return Ok(Vec::new());
        }

        let result = match message {
            ConsensusMessage::Proposal(proposal) => {
                self.observe_proposal(&proposal);
                self.engine.handle_proposal(proposal)
            }
            ConsensusMessage::Vote(vote) => self.engine.handle_vote(vote),
            ConsensusMessage::Qc(qc) => self.engine.handle_qc(qc),
            ConsensusMessage::ViewChange(vc) => self.engine.handle_view_change(vc),
        };
        // Invalid consensus messages are dropped silently; the peer gets
        // no error response.
        let actions = match result {
            Ok(actions) => actions,
            Err(err) => {
                debug!(target: "node", %err, "consensus message dropped");
                Vec::new()
            }
        };
        self.dispatch_engine_actions(actions)
    }

    /// Double-sign bookkeeping: two hashes for one `(view, height)` slot is
    /// evidence, slashed at one hundred percent.
    fn observe_proposal(&self, proposal: &Proposal) {
        let evidence = self.evidence.lock().observe(
            proposal.view,
            proposal.block_number,
            proposal.proposer,
            proposal.block_hash,
        );
        if let Some(evidence) = evidence {
            warn!(
                target: "node",
                proposer = %evidence.proposer,
                view = evidence.view,
                height = evidence.block_number,
                "double-sign evidence recorded"
            );
            let _ = self.registry.apply_slash(
                evidence.proposer,
                10_000,
                self.chain.tip_number(),
                "double-sign proposal",
            );
        }
    }

    /// Runs the state-affecting engine actions inline (finalization, view
    /// entry) and passes the wire actions through for the service to
    /// deliver over its `ConsensusOutbound` implementation.
    pub fn dispatch_engine_actions(&self, actions: Vec<Action>) -> Result<Vec<Outbound>, NodeError> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                Action::Finalized {
                    block_hash,
                    block,
                    commit_bitmap,
                } => {
                    self.finalize_block(block, block_hash, commit_bitmap)?;
                }
                Action::EnteredView(view) => {
                    debug!(target: "node", view, "entered view");
                }
                wire => out.push(Outbound::Consensus(wire)),
            }
        }
        Ok(out)
    }

    /// The block finalization pipeline.
    pub fn finalize_block(
        &self,
        block: Block,
        block_hash: Hash256,
        commit_bitmap: u64,
    ) -> Result<(), NodeError> {
        // Staking mutations made by this block's transactions roll back
        // with everything else if the block turns out invalid.
        let registry_backup = self.registry.snapshot();
        let result = self.finalize_block_inner(block, block_hash, commit_bitmap);
        if result.is_err() {
            self.registry.restore(registry_backup);
        }
        result
    }

    fn finalize_block_inner(
        &self,
        block: Block,
        block_hash: Hash256,
        commit_bitmap: u64,
    ) -> Result<(), NodeError> {
        let number = block.header.number;

        // 1. Execute against a fork of canonical state.
        let mut fork = self.state.fork()?;
        let env = TxEnv {
            params: &self.params,
            base_fee: block.header.base_fee,
            block: BlockEnv {
                height: number,
                timestamp_ms: block.header.timestamp_ms,
            },
            proposer: block.header.proposer,
        };
        let mut hooks = StakingService::new(self.registry.clone());
        let (receipts, gas_used) = execute_block(
            &mut fork,
            &block.transactions,
            &env,
            &self.contracts,
            &*self.verifier,
            &mut hooks,
        )
        .map_err(|(index, err)| NodeError::InvalidBlock(format!("tx {index}: {err}")))?;
        if gas_used != block.header.gas_used {
            return Err(NodeError::InvalidBlock(format!(
                "gas used mismatch: executed {gas_used}, header {}",
                block.header.gas_used
            )));
        }

        // 2. Validate against the header's state root and append.
        let computed_root = fork.compute_state_root()?;
        self.chain.add_block(&block, Some(computed_root))?;

        // 3. Swap the fork in; canonical state and tip move together.
        self.state.swap(fork);

        // 4. Release matured unbonding stake before the next block's
        // execution; every node applies this at the same boundary.
        self.state
            .write(|db| self.release_unbonded(db, number))?;

        // 5. Persist everything this block produced in one atomic batch.
        let epoch = self.epochs.epoch_of(number);
        let stamped = Block {
            commit_bitmap,
            ..block
        };
        let tx_hashes: Vec<Hash256> =
            stamped.transactions.iter().map(transaction_hash).collect();
        let mut receipts = receipts;
        for receipt in &mut receipts {
            receipt.block_hash = block_hash;
            receipt.post_state_root = computed_root;
        }

        let (trie_delta, flat_writes) = self
            .state
            .read(|db| (db.take_trie_delta(), db.take_flat_writes()));
        let mut batch = self.db.batch();
        for (node_hash, bytes) in trie_delta {
            batch.put(basalt_storage::CF_TRIE_NODES, &node_hash.0, &bytes)?;
        }
        self.meta.stage_flat_writes(&mut batch, &flat_writes)?;
        self.blocks.stage_block(&mut batch, block_hash, &stamped)?;
        self.receipts
            .stage_block_receipts(&mut batch, block_hash, number, &tx_hashes, &receipts)?;
        self.meta.stage_commit_record(
            &mut batch,
            &CommitRecord {
                epoch,
                block_number: number,
                bitmap: commit_bitmap,
            },
        )?;
        self.meta.stage_tip(
            &mut batch,
            &TipRecord {
                number,
                hash: block_hash,
                state_root: computed_root,
            },
        )?;
        self.meta
            .stage_staking_snapshot(&mut batch, &to_bytes_canonical(&self.registry.snapshot()))?;
        batch.commit()?;
        self.state.write(|db| db.rebase());

        // 6. The mempool sheds included and newly stale transactions.
        self.mempool.remove_included(&tx_hashes);
        self.state
            .read(|db| self.mempool.prune_stale(db, stamped.header.base_fee));

        // 7. Epoch boundary: inactivity slashing and validator-set swap.
        if self.epochs.is_boundary(number) {
            self.rotate_epoch(number)?;
        }

        // Subscribers lagging behind only miss events, never block us.
        let _ = self.block_events.send(Arc::new(stamped));

        info!(target: "node", number, %block_hash, "block finalized and persisted");
        Ok(())
    }

    /// Credits matured unbonding entries from escrow back to their owners.
    /// Applied immediately after a block lands — on the live path against
    /// canonical state, on the sync path against the batch fork — so every
    /// node folds the credits into the same pre-state of the next block.
    fn release_unbonded<S: StateAccess>(
        &self,
        state: &mut S,
        current_block: u64,
    ) -> Result<(), NodeError> {
        let completed = self.registry.process_unbonding(current_block);
        if completed.is_empty() {
            return Ok(());
        }
        for entry in &completed {
            let recipient = entry.delegator.unwrap_or(entry.validator);
            let mut escrow = state.get_account(&STAKING_ESCROW)?.unwrap_or_default();
            escrow.balance = escrow.balance.saturating_sub(entry.amount);
            state.set_account(STAKING_ESCROW, escrow)?;
            let mut account = state.get_account(&recipient)?.unwrap_or_default();
            account.balance = account.balance.saturating_add(entry.amount);
            state.set_account(recipient, account)?;
        }
        info!(target: "node", released = completed.len(), "unbonded stake released");
        Ok(())
    }

    /// Epoch rotation: slash inactivity from the epoch's commit bitmaps,
    /// rebuild the set from stake, and reset the engine.
    fn rotate_epoch(&self, boundary_block: u64) -> Result<(), NodeError> {
        let ending_epoch = self.epochs.epoch_of(boundary_block.saturating_sub(1));
        let epoch_start = ending_epoch * self.params.epoch_length;
        let records = self.meta.commit_records(epoch_start.max(1), boundary_block)?;

        let old_set = self.engine.validators();
        let slashed =
            self.epochs
                .apply_inactivity_slashes(&self.registry, &old_set, &records, boundary_block);
        if !slashed.is_empty() {
            info!(target: "node", count = slashed.len(), "validators slashed for inactivity");
        }

        let new_epoch = self.epochs.epoch_of(boundary_block + 1);
        let new_set = self
            .epochs
            .rebuild_validator_set(new_epoch, &self.registry, &old_set);
        info!(
            target: "node",
            epoch = new_epoch,
            validators = new_set.len(),
            "validator set rotated"
        );
        self.engine.begin_epoch(new_set, boundary_block + 1);
        Ok(())
    }

    /// Applies a sync batch. Either the whole batch lands — blocks, state
    /// and persistence — or everything rolls back.
    pub fn apply_sync_response(
        &self,
        sequence: u64,
        blocks: Vec<Block>,
    ) -> Result<u64, NodeError> {
        self.sync.accept(sequence)?;
        if blocks.is_empty() {
            self.sync.finish();
            return Ok(self.chain.tip_number());
        }

        let tip_before = self.chain.tip();
        let registry_backup = self.registry.snapshot();
        let mut fork = self.state.fork()?;
        let mut staged: Vec<(Block, Hash256, Vec<Receipt>, Vec<Hash256>)> = Vec::new();

        let result = (|| -> Result<(), NodeError> {
            for block in &blocks {
                let env = TxEnv {
                    params: &self.params,
                    base_fee: block.header.base_fee,
                    block: BlockEnv {
                        height: block.header.number,
                        timestamp_ms: block.header.timestamp_ms,
                    },
                    proposer: block.header.proposer,
                };
                let mut hooks = StakingService::new(self.registry.clone());
                let (mut receipts, gas_used) = execute_block(
                    &mut fork,
                    &block.transactions,
                    &env,
                    &self.contracts,
                    &*self.verifier,
                    &mut hooks,
                )
                .map_err(|(index, err)| {
                    NodeError::InvalidBlock(format!(
                        "sync block {}: tx {index}: {err}",
                        block.header.number
                    ))
                })?;
                if gas_used != block.header.gas_used {
                    return Err(NodeError::InvalidBlock(format!(
                        "sync block {} gas mismatch",
                        block.header.number
                    )));
                }
                let root = fork.compute_state_root()?;
                self.chain.add_block(block, Some(root))?;
                // Same boundary rule as the live path: credits fold into
                // the next block's pre-state.
                self.release_unbonded(&mut fork, block.header.number)?;
                let hash = block_hash(&block.header);
                let tx_hashes: Vec<Hash256> =
                    block.transactions.iter().map(transaction_hash).collect();
                for receipt in &mut receipts {
                    receipt.block_hash = hash;
                    receipt.post_state_root = root;
                }
                staged.push((block.clone(), hash, receipts, tx_hashes));
            }
            Ok(())
        })();

        if let Err(err) = result {
            // Roll back BOTH the chain manager and the forked state: the
            // fork is simply dropped, the tip rewound, and staking state
            // restored to its pre-batch snapshot.
            warn!(target: "node", %err, "sync batch failed; rolling back");
            self.chain.rewind_to(tip_before.header);
            self.registry.restore(registry_backup);
            self.sync.finish();
            return Err(err);
        }

        // The whole batch validated: swap and persist.
        self.state.swap(fork);
        let (trie_delta, flat_writes) = self
            .state
            .read(|db| (db.take_trie_delta(), db.take_flat_writes()));
        let mut batch = self.db.batch();
        for (node_hash, bytes) in trie_delta {
            batch.put(basalt_storage::CF_TRIE_NODES, &node_hash.0, &bytes)?;
        }
        self.meta.stage_flat_writes(&mut batch, &flat_writes)?;
        let mut last: Option<&(Block, Hash256, Vec<Receipt>, Vec<Hash256>)> = None;
        for entry in &staged {
            let (block, hash, receipts, tx_hashes) = entry;
            self.blocks.stage_block(&mut batch, *hash, block)?;
            self.receipts.stage_block_receipts(
                &mut batch,
                *hash,
                block.header.number,
                tx_hashes,
                receipts,
            )?;
            self.meta.stage_commit_record(
                &mut batch,
                &CommitRecord {
                    epoch: self.epochs.epoch_of(block.header.number),
                    block_number: block.header.number,
                    bitmap: block.commit_bitmap,
                },
            )?;
            last = Some(entry);
        }
        if let Some((block, hash, _, _)) = last {
            self.meta.stage_tip(
                &mut batch,
                &TipRecord {
                    number: block.header.number,
                    hash: *hash,
                    state_root: block.header.state_root,
                },
            )?;
        }
        self.meta
            .stage_staking_snapshot(&mut batch, &to_bytes_canonical(&self.registry.snapshot()))?;
        batch.commit()?;
        self.state.write(|db| db.rebase());

        // Epoch boundaries crossed during the batch rotate exactly as on
        // the live path.
        for (block, _, _, _) in &staged {
            if self.epochs.is_boundary(block.header.number) {
                self.rotate_epoch(block.header.number)?;
            }
        }
        let new_tip = self.chain.tip_number();
        self.engine
            .begin_epoch(self.engine.validators(), new_tip + 1);
        self.sync.finish();
        info!(target: "node", blocks = staged.len(), tip = new_tip, "sync batch applied");
        Ok(new_tip)
    }

    /// Full inbound entry point used by the connection layer.
    pub fn handle_envelope(
        &self,
        envelope: Envelope,
        authenticated_peer: PeerId,
        now_ms: u64,
    ) -> Result<Vec<Outbound>, NodeError> {
        if envelope.sender != authenticated_peer {
            return Err(NodeError::Network(
                basalt_types::NetworkError::IdentityMismatch,
            ));
        }
        envelope
            .validate_timestamp(now_ms)
            .map_err(NodeError::Network)?;
        self.handle_payload(envelope.sender, envelope.payload)
    }
}
