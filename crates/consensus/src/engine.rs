//! The three-phase BFT engine.
//!
//! Non-leaders send individual votes only to the round's leader; the leader
//! aggregates quorum-many BLS signatures into a quorum certificate and
//! broadcasts it, keeping message complexity linear. One lock guards the
//! whole engine state; every handler runs inside it and returns the actions
//! the node must perform, so no network I/O ever happens under the lock.
//!
//! With `max_pipeline_depth == 1` this is the basic engine; higher depths
//! allow consecutive heights to run concurrently while finalization is
//! delivered strictly in height order through a sorted buffer.

use crate::leader::leader_for;
use crate::messages::{Proposal, QuorumCertificate, ViewChange, Vote};
use crate::payload::{consensus_payload, view_change_payload, Phase};
use basalt_crypto::{block_hash, bls, ValidatorKeys};
use basalt_types::{
    Address, Block, BlsPublicKey, BlsSignature, ConsensusError, Hash256, PeerId, ValidatorSet,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the node must do after a handler returns.
#[derive(Debug, Clone)]
pub enum Action {
    BroadcastProposal(Proposal),
    SendVoteToLeader { vote: Vote, leader: PeerId },
    BroadcastQc(QuorumCertificate),
    BroadcastViewChange(ViewChange),
    /// Emitted strictly in increasing height order.
    Finalized {
        block_hash: Hash256,
        block: Block,
        commit_bitmap: u64,
    },
    /// The engine advanced to a new view; the node should start a round if
    /// it leads it.
    EnteredView(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Preparing,
    PreCommitting,
    Committing,
    Finalized,
}

struct Round {
    view: u64,
    block_hash: Hash256,
    block: Option<Block>,
    phase: RoundPhase,
    prepare_votes: HashMap<Address, BlsSignature>,
    pre_commit_votes: HashMap<Address, BlsSignature>,
    commit_votes: HashMap<Address, BlsSignature>,
}

impl Round {
    fn new(view: u64, block_hash: Hash256, block: Option<Block>) -> Self {
        Self {
            view,
            block_hash,
            block,
            phase: RoundPhase::Preparing,
            prepare_votes: HashMap::new(),
            pre_commit_votes: HashMap::new(),
            commit_votes: HashMap::new(),
        }
    }

    fn collecting(&self) -> Option<Phase> {
        match self.phase {
            RoundPhase::Preparing => Some(Phase::Prepare),
            RoundPhase::PreCommitting => Some(Phase::PreCommit),
            RoundPhase::Committing => Some(Phase::Commit),
            RoundPhase::Finalized => None,
        }
    }

    fn votes_for(&mut self, phase: Phase) -> &mut HashMap<Address, BlsSignature> {
        match phase {
            Phase::Prepare => &mut self.prepare_votes,
            Phase::PreCommit => &mut self.pre_commit_votes,
            Phase::Commit => &mut self.commit_votes,
        }
    }
}

struct EngineState {
    validators: ValidatorSet,
    /// Shared view clock for all in-flight rounds; never moves backward.
    current_view: u64,
    /// Floor for views of newly started rounds; reset only on epoch
    /// transition.
    min_next_view: u64,
    /// Whether we emitted a view change in the current view.
    timed_out: bool,
    /// Proposed views we already auto-joined; auto-join fires at most once
    /// per proposed view.
    auto_joined: HashSet<u64>,
    view_changes: HashMap<u64, HashMap<Address, BlsSignature>>,
    rounds: BTreeMap<u64, Round>,
    /// Votes that arrived for `current_view + 1` before the fast-forward;
    /// keyed by height, then voter.
    pending_prepare: HashMap<u64, HashMap<Address, (u64, Hash256, BlsSignature)>>,
    /// Heights that reached COMMIT quorum but are waiting for a lower
    /// height; drained contiguously.
    finalized_buffer: BTreeMap<u64, (Hash256, Block, u64)>,
    /// Next height to deliver.
    next_height: u64,
}

pub struct BftEngine {
    chain_id: u32,
    max_pipeline_depth: usize,
    signer: Option<Arc<ValidatorKeys>>,
    state: Mutex<EngineState>,
}

impl BftEngine {
    /// The basic, one-round-at-a-time engine.
    pub fn single(chain_id: u32, signer: Option<Arc<ValidatorKeys>>) -> Self {
        Self::pipelined(chain_id, 1, signer)
    }

    /// The pipelined engine: up to `max_pipeline_depth` consecutive heights
    /// in flight.
    pub fn pipelined(
        chain_id: u32,
        max_pipeline_depth: usize,
        signer: Option<Arc<ValidatorKeys>>,
    ) -> Self {
        Self {
            chain_id,
            max_pipeline_depth: max_pipeline_depth.max(1),
            signer,
            state: Mutex::new(EngineState {
                validators: ValidatorSet::default(),
                current_view: 0,
                min_next_view: 0,
                timed_out: false,
                auto_joined: HashSet::new(),
                view_changes: HashMap::new(),
                rounds: BTreeMap::new(),
                pending_prepare: HashMap::new(),
                finalized_buffer: BTreeMap::new(),
                next_height: 1,
            }),
        }
    }

    fn our_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|keys| keys.address())
    }

    /// Installs the validator set and the next height to finalize. Called
    /// at startup and on every epoch transition; `min_next_view` and the
    /// view clock reset here and nowhere else.
    pub fn begin_epoch(&self, validators: ValidatorSet, next_height: u64) {
        let mut state = self.state.lock();
        state.validators = validators;
        state.current_view = 0;
        state.min_next_view = 0;
        state.timed_out = false;
        state.auto_joined.clear();
        state.view_changes.clear();
        state.rounds.clear();
        state.pending_prepare.clear();
        state.next_height = next_height;
        // Finalized-but-undelivered blocks never survive an epoch change;
        // the epoch boundary itself is a delivered block.
        state.finalized_buffer.clear();
    }

    pub fn current_view(&self) -> u64 {
        self.state.lock().current_view
    }

    pub fn next_height(&self) -> u64 {
        self.state.lock().next_height
    }

    pub fn validators(&self) -> ValidatorSet {
        self.state.lock().validators.clone()
    }

    /// The leader's entry point: propose `block` for its height at the
    /// current view.
    pub fn start_round(&self, block: Block) -> Result<Vec<Action>, ConsensusError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(ConsensusError::NotValidator)?
            .clone();
        let our_address = signer.address();

        let mut state = self.state.lock();
        let height = block.header.number;
        self.ensure_in_window(&state, height)?;
        if state.rounds.contains_key(&height) {
            return Err(ConsensusError::DuplicateProposal { height });
        }

        // A view change that completed before this round proposes at the
        // agreed view, not the one we crashed out of.
        if state.min_next_view > state.current_view {
            state.current_view = state.min_next_view;
        }
        let view = state.current_view;

        let leader = leader_for(&state.validators, height, view)
            .ok_or(ConsensusError::NotValidator)?;
        if leader.address != our_address {
            return Err(ConsensusError::WrongLeader {
                expected: leader.address,
                got: our_address,
            });
        }

        let hash = block_hash(&block.header);
        let payload = consensus_payload(self.chain_id, Phase::Prepare, view, height, &hash);
        let signature = signer.sign_consensus(&payload);

        let mut round = Round::new(view, hash, Some(block.clone()));
        round.prepare_votes.insert(our_address, signature);

        // Absorb any PREPARE votes that raced ahead of our proposal.
        if let Some(pending) = state.pending_prepare.remove(&height) {
            for (voter, (vote_view, vote_hash, vote_sig)) in pending {
                if vote_view == view && vote_hash == hash {
                    round.prepare_votes.insert(voter, vote_sig);
                }
            }
        }
        state.rounds.insert(height, round);

        info!(
            target: "consensus",
            height,
            view,
            %hash,
            "proposing block"
        );
        let mut actions = vec![Action::BroadcastProposal(Proposal {
            view,
            block_number: height,
            block_hash: hash,
            block,
            proposer: our_address,
            signature,
        })];
        actions.extend(self.advance_rounds(&mut state, height)?);
        Ok(actions)
    }

    /// Handles a proposal from the network.
    pub fn handle_proposal(&self, proposal: Proposal) -> Result<Vec<Action>, ConsensusError> {
        let mut state = self.state.lock();
        let height = proposal.block_number;
        self.ensure_in_window(&state, height)?;

        // Fast-forward applies only to the height we are currently working
        // on, at exactly the next view; a proposal for any other height
        // never moves the view. Nothing moves until the proposal proves
        // authentic below.
        let fast_forward = proposal.view == state.current_view + 1 && height == state.next_height;
        if !fast_forward && proposal.view != state.current_view {
            return Err(ConsensusError::ViewMismatch {
                current: state.current_view,
                got: proposal.view,
            });
        }
        let view = proposal.view;

        let (leader_address, leader_peer, leader_bls) = {
            let leader = leader_for(&state.validators, height, view)
                .ok_or(ConsensusError::NotValidator)?;
            (leader.address, leader.peer_id, leader.bls_public_key)
        };
        if proposal.proposer != leader_address {
            return Err(ConsensusError::WrongLeader {
                expected: leader_address,
                got: proposal.proposer,
            });
        }

        // The advertised hash must be the block's real hash.
        if block_hash(&proposal.block.header) != proposal.block_hash
            || proposal.block.header.number != height
        {
            return Err(ConsensusError::SignatureInvalid);
        }

        let payload =
            consensus_payload(self.chain_id, Phase::Prepare, view, height, &proposal.block_hash);
        bls::verify(&leader_bls, &payload, &proposal.signature)
            .map_err(|_| ConsensusError::SignatureInvalid)?;

        if fast_forward {
            debug!(
                target: "consensus",
                height,
                from = state.current_view,
                to = view,
                "fast-forwarding view for verified next-view proposal"
            );
            // The old view's rounds are stale once we adopt the new view.
            Self::abort_unfinalized_rounds(&mut state);
            state.current_view = view;
            state.timed_out = false;
        }

        match state.rounds.get(&height) {
            Some(round) if round.view == view => {
                if round.block_hash != proposal.block_hash {
                    // A second, conflicting proposal is rejected, never
                    // silently adopted. Equivocation evidence is recorded
                    // by the caller.
                    return Err(ConsensusError::DuplicateProposal { height });
                }
                return Ok(Vec::new());
            }
            Some(_) => {
                // Stale round from an earlier view; replace it below.
                state.rounds.remove(&height);
            }
            None => {}
        }

        state
            .rounds
            .insert(height, Round::new(view, proposal.block_hash, Some(proposal.block)));
        debug!(target: "consensus", height, view, "entered prepare phase");

        // Vote PREPARE, straight to the leader.
        let mut actions = Vec::new();
        if let Some(signer) = &self.signer {
            let our_address = signer.address();
            if state.validators.contains_address(&our_address) && our_address != leader_address {
                let signature = signer.sign_consensus(&payload);
                actions.push(Action::SendVoteToLeader {
                    vote: Vote {
                        phase: Phase::Prepare,
                        view,
                        block_number: height,
                        block_hash: proposal.block_hash,
                        voter: our_address,
                        signature,
                    },
                    leader: leader_peer,
                });
            }
        }
        Ok(actions)
    }

    /// Handles an individual vote; meaningful only on the round's leader.
    pub fn handle_vote(&self, vote: Vote) -> Result<Vec<Action>, ConsensusError> {
        let mut state = self.state.lock();
        let height = vote.block_number;

        let voter_bls = state
            .validators
            .by_address(&vote.voter)
            .ok_or(ConsensusError::NotValidator)?
            .bls_public_key;

        // Pre-count PREPARE votes for the next view: they become real when
        // the fast-forward or view change lands.
        let is_next_view_prepare =
            vote.phase == Phase::Prepare && vote.view == state.current_view + 1;
        if !is_next_view_prepare {
            let round = state
                .rounds
                .get(&height)
                .ok_or(ConsensusError::UnknownRound(height))?;
            if vote.view != round.view {
                return Err(ConsensusError::ViewMismatch {
                    current: round.view,
                    got: vote.view,
                });
            }
            if vote.block_hash != round.block_hash {
                return Err(ConsensusError::HeightMismatch {
                    current: height,
                    got: vote.block_number,
                });
            }
        }

        let payload = consensus_payload(
            self.chain_id,
            vote.phase,
            vote.view,
            height,
            &vote.block_hash,
        );
        bls::verify(&voter_bls, &payload, &vote.signature)
            .map_err(|_| ConsensusError::SignatureInvalid)?;

        if is_next_view_prepare {
            state
                .pending_prepare
                .entry(height)
                .or_default()
                .insert(vote.voter, (vote.view, vote.block_hash, vote.signature));
            return Ok(Vec::new());
        }

        let round = state
            .rounds
            .get_mut(&height)
            .ok_or(ConsensusError::UnknownRound(height))?;
        let Some(collecting) = round.collecting() else {
            return Ok(Vec::new());
        };
        if vote.phase != collecting {
            // Early or late for the current phase; votes for finished
            // phases are harmless duplicates of the QC.
            return Ok(Vec::new());
        }
        // Duplicate signatures from one validator count once.
        round.votes_for(vote.phase).insert(vote.voter, vote.signature);

        self.advance_rounds(&mut state, height)
    }

    /// Handles an aggregate certificate from the leader.
    pub fn handle_qc(&self, qc: QuorumCertificate) -> Result<Vec<Action>, ConsensusError> {
        let mut state = self.state.lock();
        let height = qc.block_number;
        if height < state.next_height {
            return Ok(Vec::new());
        }
        self.ensure_in_window(&state, height)?;

        // Cheap structural checks come before any pairing work.
        let quorum = state.validators.quorum();
        let popcount = qc.signers_bitmap.count_ones() as usize;
        if popcount < quorum {
            return Err(ConsensusError::BitmapBelowQuorum {
                quorum,
                got: popcount,
            });
        }
        let signers = state
            .validators
            .signers_from_bitmap(qc.signers_bitmap)
            .map_err(|_| ConsensusError::BitmapOutOfRange(64))?;
        let keys: Vec<BlsPublicKey> = signers.iter().map(|v| v.bls_public_key).collect();

        let payload =
            consensus_payload(self.chain_id, qc.phase, qc.view, height, &qc.block_hash);
        bls::aggregate_verify_same_msg(&keys, &payload, &qc.aggregate_signature)
            .map_err(|_| ConsensusError::SignatureInvalid)?;

        let round = state
            .rounds
            .get_mut(&height)
            .ok_or(ConsensusError::UnknownRound(height))?;
        if qc.view != round.view || qc.block_hash != round.block_hash {
            return Err(ConsensusError::ViewMismatch {
                current: round.view,
                got: qc.view,
            });
        }

        let mut actions = Vec::new();
        match qc.phase {
            Phase::Prepare if round.phase == RoundPhase::Preparing => {
                round.phase = RoundPhase::PreCommitting;
                actions.extend(self.vote_after_qc(&state, Phase::PreCommit, &qc)?);
            }
            Phase::PreCommit if round.phase == RoundPhase::PreCommitting => {
                round.phase = RoundPhase::Committing;
                actions.extend(self.vote_after_qc(&state, Phase::Commit, &qc)?);
            }
            Phase::Commit if round.phase != RoundPhase::Finalized => {
                round.phase = RoundPhase::Finalized;
                let block = round.block.take();
                Self::buffer_finalized(&mut state, height, qc.block_hash, block, qc.signers_bitmap);
                actions.extend(Self::drain_finalized(&mut state));
            }
            // A certificate for a phase the round already passed.
            _ => {}
        }
        Ok(actions)
    }

    /// Handles a view-change message.
    pub fn handle_view_change(&self, vc: ViewChange) -> Result<Vec<Action>, ConsensusError> {
        let mut state = self.state.lock();

        let voter_bls = state
            .validators
            .by_address(&vc.voter)
            .ok_or(ConsensusError::NotValidator)?
            .bls_public_key;
        let payload = view_change_payload(self.chain_id, vc.proposed_view);
        bls::verify(&voter_bls, &payload, &vc.signature)
            .map_err(|_| ConsensusError::SignatureInvalid)?;

        // The view never moves backward.
        if vc.proposed_view <= state.current_view {
            return Ok(Vec::new());
        }

        state
            .view_changes
            .entry(vc.proposed_view)
            .or_default()
            .insert(vc.voter, vc.signature);

        let mut actions = Vec::new();

        // Auto-join: only a validator that has itself timed out chimes in
        // on a higher proposed view, and only once per proposed view. This
        // resolves parity splits without letting one faulty node's timeout
        // cascade through live validators.
        if state.timed_out
            && vc.proposed_view > state.current_view + 1
            && !state.auto_joined.contains(&vc.proposed_view)
        {
            if let Some(signer) = &self.signer {
                let our_address = signer.address();
                if state.validators.contains_address(&our_address) {
                    state.auto_joined.insert(vc.proposed_view);
                    let signature = signer.sign_consensus(&payload);
                    state
                        .view_changes
                        .entry(vc.proposed_view)
                        .or_default()
                        .insert(our_address, signature);
                    debug!(
                        target: "consensus",
                        proposed_view = vc.proposed_view,
                        "auto-joining view change"
                    );
                    actions.push(Action::BroadcastViewChange(ViewChange {
                        proposed_view: vc.proposed_view,
                        voter: our_address,
                        signature,
                    }));
                }
            }
        }

        actions.extend(self.try_enter_view(&mut state, vc.proposed_view));
        Ok(actions)
    }

    /// Called by the node's round timer. Emits a signed view change for
    /// `current_view + 1` and marks us timed out.
    pub fn on_timeout(&self) -> Result<Vec<Action>, ConsensusError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(ConsensusError::NotValidator)?
            .clone();
        let mut state = self.state.lock();
        if state.timed_out {
            return Ok(Vec::new());
        }
        let our_address = signer.address();
        if !state.validators.contains_address(&our_address) {
            return Err(ConsensusError::NotValidator);
        }

        state.timed_out = true;
        let proposed_view = state.current_view + 1;
        let payload = view_change_payload(self.chain_id, proposed_view);
        let signature = signer.sign_consensus(&payload);
        state
            .view_changes
            .entry(proposed_view)
            .or_default()
            .insert(our_address, signature);
        warn!(target: "consensus", view = state.current_view, proposed_view, "view timed out");

        let mut actions = vec![Action::BroadcastViewChange(ViewChange {
            proposed_view,
            voter: our_address,
            signature,
        })];
        actions.extend(self.try_enter_view(&mut state, proposed_view));
        Ok(actions)
    }

    fn try_enter_view(&self, state: &mut EngineState, proposed_view: u64) -> Vec<Action> {
        let quorum = state.validators.quorum();
        let votes = state
            .view_changes
            .get(&proposed_view)
            .map(HashMap::len)
            .unwrap_or(0);
        if votes < quorum || proposed_view <= state.current_view {
            return Vec::new();
        }

        info!(target: "consensus", from = state.current_view, to = proposed_view, "view change quorum reached");
        state.current_view = proposed_view;
        // Any start_round for a height we were working on proposes at the
        // agreed view or later; this floor holds until the epoch ends.
        state.min_next_view = proposed_view;
        state.timed_out = false;
        Self::abort_unfinalized_rounds(state);
        state.view_changes.retain(|view, _| *view > proposed_view);
        state.auto_joined.retain(|view| *view > proposed_view);
        vec![Action::EnteredView(proposed_view)]
    }

    fn abort_unfinalized_rounds(state: &mut EngineState) {
        state
            .rounds
            .retain(|_, round| round.phase == RoundPhase::Finalized);
        state.pending_prepare.clear();
    }

    /// Leader-side quorum cascade: aggregate, emit the certificate, record
    /// our own next-phase vote, and repeat while quorums keep forming
    /// (immediate for a validator set of one).
    fn advance_rounds(
        &self,
        state: &mut EngineState,
        height: u64,
    ) -> Result<Vec<Action>, ConsensusError> {
        let mut actions = Vec::new();
        loop {
            let quorum = state.validators.quorum();
            let EngineState {
                validators, rounds, ..
            } = &mut *state;
            let Some(round) = rounds.get_mut(&height) else {
                break;
            };
            let Some(phase) = round.collecting() else {
                break;
            };
            let votes = match phase {
                Phase::Prepare => &round.prepare_votes,
                Phase::PreCommit => &round.pre_commit_votes,
                Phase::Commit => &round.commit_votes,
            };
            if votes.len() < quorum {
                break;
            }

            // Aggregate the collected signatures into a certificate.
            let mut bitmap = 0u64;
            let mut signatures = Vec::with_capacity(votes.len());
            for (address, signature) in votes.iter() {
                let validator = validators
                    .by_address(address)
                    .ok_or(ConsensusError::NotValidator)?;
                bitmap |= 1u64 << validator.index;
                signatures.push(*signature);
            }
            let aggregate = bls::aggregate_signatures(&signatures)
                .map_err(|e| ConsensusError::Crypto(e.to_string()))?;
            let qc = QuorumCertificate {
                phase,
                view: round.view,
                block_number: height,
                block_hash: round.block_hash,
                signers_bitmap: bitmap,
                aggregate_signature: aggregate,
            };
            info!(
                target: "consensus",
                height,
                view = round.view,
                phase = ?phase,
                signers = bitmap.count_ones(),
                "quorum certificate formed"
            );
            actions.push(Action::BroadcastQc(qc));

            match phase.next() {
                Some(next_phase) => {
                    round.phase = match next_phase {
                        Phase::PreCommit => RoundPhase::PreCommitting,
                        Phase::Commit => RoundPhase::Committing,
                        Phase::Prepare => unreachable!("prepare never follows a phase"),
                    };
                    // The leader contributes its own vote to the next
                    // phase immediately.
                    if let Some(signer) = &self.signer {
                        let our_address = signer.address();
                        if validators.contains_address(&our_address) {
                            let payload = consensus_payload(
                                self.chain_id,
                                next_phase,
                                round.view,
                                height,
                                &round.block_hash,
                            );
                            round
                                .votes_for(next_phase)
                                .insert(our_address, signer.sign_consensus(&payload));
                        }
                    }
                }
                None => {
                    round.phase = RoundPhase::Finalized;
                    let block = round.block.take();
                    let block_hash = round.block_hash;
                    Self::buffer_finalized(state, height, block_hash, block, bitmap);
                    actions.extend(Self::drain_finalized(state));
                    break;
                }
            }
        }
        Ok(actions)
    }

    /// Our vote for the phase after a verified certificate, addressed to
    /// the leader of the round's view.
    fn vote_after_qc(
        &self,
        state: &EngineState,
        phase: Phase,
        qc: &QuorumCertificate,
    ) -> Result<Vec<Action>, ConsensusError> {
        let Some(signer) = &self.signer else {
            return Ok(Vec::new());
        };
        let our_address = signer.address();
        if !state.validators.contains_address(&our_address) {
            return Ok(Vec::new());
        }
        let leader = leader_for(&state.validators, qc.block_number, qc.view)
            .ok_or(ConsensusError::NotValidator)?;
        if leader.address == our_address {
            // The leader's own vote was recorded when it formed the QC.
            return Ok(Vec::new());
        }
        let payload = consensus_payload(
            self.chain_id,
            phase,
            qc.view,
            qc.block_number,
            &qc.block_hash,
        );
        Ok(vec![Action::SendVoteToLeader {
            vote: Vote {
                phase,
                view: qc.view,
                block_number: qc.block_number,
                block_hash: qc.block_hash,
                voter: our_address,
                signature: signer.sign_consensus(&payload),
            },
            leader: leader.peer_id,
        }])
    }

    fn buffer_finalized(
        state: &mut EngineState,
        height: u64,
        block_hash: Hash256,
        block: Option<Block>,
        bitmap: u64,
    ) {
        let Some(block) = block else {
            // A round finalized without its block body cannot be delivered;
            // sync will fetch it. Should not happen for rounds we created.
            warn!(target: "consensus", height, "finalized round without block body");
            return;
        };
        state
            .finalized_buffer
            .insert(height, (block_hash, block, bitmap));
    }

    /// Delivers finalized blocks strictly in height order; out-of-order
    /// commits wait in the buffer.
    fn drain_finalized(state: &mut EngineState) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Some((block_hash, block, bitmap)) =
            state.finalized_buffer.remove(&state.next_height)
        {
            info!(target: "consensus", height = state.next_height, %block_hash, "block finalized");
            state.rounds.remove(&state.next_height);
            state.next_height += 1;
            actions.push(Action::Finalized {
                block_hash,
                block,
                commit_bitmap: bitmap,
            });
        }
        actions
    }

    fn ensure_in_window(&self, state: &EngineState, height: u64) -> Result<(), ConsensusError> {
        if height < state.next_height {
            return Err(ConsensusError::HeightMismatch {
                current: state.next_height,
                got: height,
            });
        }
        if height >= state.next_height + self.max_pipeline_depth as u64 {
            return Err(ConsensusError::PipelineFull(self.max_pipeline_depth));
        }
        Ok(())
    }
}
