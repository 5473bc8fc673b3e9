#![allow(dead_code)]

//! Shared harness: a set of real-keyed validators and a message bus that
//! routes engine actions between them the way the node's transport would.

use basalt_consensus::{Action, BftEngine};
use basalt_crypto::ValidatorKeys;
use basalt_types::{
    Address, Block, BlockHeader, Hash256, PeerId, U256, ValidatorInfo, ValidatorSet,
};
use std::collections::VecDeque;
use std::sync::Arc;

pub const CHAIN_ID: u32 = 100;

pub struct Cluster {
    pub keys: Vec<Arc<ValidatorKeys>>,
    pub set: ValidatorSet,
    pub engines: Vec<BftEngine>,
}

pub fn cluster(n: usize, depth: usize) -> Cluster {
    let keys: Vec<Arc<ValidatorKeys>> = (0..n)
        .map(|i| {
            Arc::new(
                ValidatorKeys::from_seeds(&[i as u8 + 1; 32], &[i as u8 + 101; 32]).unwrap(),
            )
        })
        .collect();
    let mut infos: Vec<ValidatorInfo> = keys
        .iter()
        .map(|k| ValidatorInfo {
            peer_id: k.peer_id(),
            ed25519_public_key: k.ed25519_public(),
            bls_public_key: k.bls_public(),
            address: k.address(),
            index: 0,
            stake: U256::from(100u64) * U256::exp10(18),
        })
        .collect();
    infos.sort_by(|a, b| a.address.cmp(&b.address));
    for (i, info) in infos.iter_mut().enumerate() {
        info.index = i as u32;
    }
    let set = ValidatorSet::new(0, infos);

    let engines: Vec<BftEngine> = keys
        .iter()
        .map(|k| {
            let engine = BftEngine::pipelined(CHAIN_ID, depth, Some(k.clone()));
            engine.begin_epoch(set.clone(), 1);
            engine
        })
        .collect();
    Cluster { keys, set, engines }
}

impl Cluster {
    pub fn engine_of(&self, address: &Address) -> usize {
        self.keys
            .iter()
            .position(|k| k.address() == *address)
            .expect("address belongs to the cluster")
    }

    pub fn engine_of_peer(&self, peer: &PeerId) -> usize {
        self.keys
            .iter()
            .position(|k| k.peer_id() == *peer)
            .expect("peer belongs to the cluster")
    }
}

pub fn block_at(number: u64) -> Block {
    Block {
        header: BlockHeader {
            number,
            parent_hash: Hash256([number as u8; 32]),
            chain_id: CHAIN_ID,
            timestamp_ms: number * 1_000,
            state_root: Hash256([0xaa; 32]),
            tx_root: Hash256::ZERO,
            receipts_root: Hash256::ZERO,
            gas_used: 0,
            gas_limit: 30_000_000,
            base_fee: U256::one(),
            proposer: Address::ZERO,
            extra_data: vec![],
            protocol_version: 1,
        },
        transactions: vec![],
        commit_bitmap: 0,
    }
}

/// One routed event: which engine finalized what.
#[derive(Debug, Clone)]
pub struct FinalizedEvent {
    pub engine: usize,
    pub block_number: u64,
    pub block_hash: Hash256,
    pub commit_bitmap: u64,
}

/// Routes every pending action to its recipients until the bus drains,
/// collecting finalization events. Invalid messages are dropped silently,
/// as the node's edge does.
pub fn route_until_quiet(
    cluster: &Cluster,
    seed: Vec<(usize, Action)>,
) -> Vec<FinalizedEvent> {
    let mut queue: VecDeque<(usize, Action)> = seed.into();
    let mut finalized = Vec::new();

    while let Some((origin, action)) = queue.pop_front() {
        match action {
            Action::BroadcastProposal(proposal) => {
                for (i, engine) in cluster.engines.iter().enumerate() {
                    if i == origin {
                        continue;
                    }
                    if let Ok(actions) = engine.handle_proposal(proposal.clone()) {
                        queue.extend(actions.into_iter().map(|a| (i, a)));
                    }
                }
            }
            Action::SendVoteToLeader { vote, leader } => {
                let target = cluster.engine_of_peer(&leader);
                if let Ok(actions) = cluster.engines[target].handle_vote(vote) {
                    queue.extend(actions.into_iter().map(|a| (target, a)));
                }
            }
            Action::BroadcastQc(qc) => {
                for (i, engine) in cluster.engines.iter().enumerate() {
                    if i == origin {
                        continue;
                    }
                    if let Ok(actions) = engine.handle_qc(qc) {
                        queue.extend(actions.into_iter().map(|a| (i, a)));
                    }
                }
            }
            Action::BroadcastViewChange(vc) => {
                for (i, engine) in cluster.engines.iter().enumerate() {
                    if i == origin {
                        continue;
                    }
                    if let Ok(actions) = engine.handle_view_change(vc.clone()) {
                        queue.extend(actions.into_iter().map(|a| (i, a)));
                    }
                }
            }
            Action::Finalized {
                block_hash,
                block,
                commit_bitmap,
            } => {
                finalized.push(FinalizedEvent {
                    engine: origin,
                    block_number: block.header.number,
                    block_hash,
                    commit_bitmap,
                });
            }
            Action::EnteredView(_) => {}
        }
    }
    finalized
}
