//! View-change behaviour: the parity-split auto-join and fast-forward
//! proposals.

mod common;

use basalt_consensus::{consensus_payload, leader_for, Action, Phase, Proposal};
use basalt_crypto::block_hash;
use basalt_types::ConsensusError;
use common::{block_at, cluster, CHAIN_ID};

/// Two validators reach view 1 while two stay at view 0; all four are
/// timed out. The view-1 pair times out again and proposes view 2; the
/// view-0 pair auto-joins, and within one routed round every engine sits
/// at view 2.
#[test]
fn parity_split_resolves_through_auto_join() {
    let cluster = cluster(4, 1);
    let engines = &cluster.engines;

    // Everyone times out at view 0 and proposes view 1.
    let mut vc1 = Vec::new();
    for engine in engines.iter() {
        for action in engine.on_timeout().unwrap() {
            if let Action::BroadcastViewChange(vc) = action {
                vc1.push(vc);
            }
        }
    }
    assert_eq!(vc1.len(), 4);

    // Deliver view-1 votes only to engines 1 and 3: the network glitch
    // that creates the split.
    for vc in &vc1 {
        for i in [1usize, 3] {
            let _ = engines[i].handle_view_change(vc.clone());
        }
    }
    assert_eq!(engines[0].current_view(), 0);
    assert_eq!(engines[1].current_view(), 1);
    assert_eq!(engines[2].current_view(), 0);
    assert_eq!(engines[3].current_view(), 1);

    // The advanced pair times out at view 1 and proposes view 2.
    let mut vc2 = Vec::new();
    for i in [1usize, 3] {
        for action in engines[i].on_timeout().unwrap() {
            if let Action::BroadcastViewChange(vc) = action {
                vc2.push(vc);
            }
        }
    }
    assert_eq!(vc2.len(), 2);

    // Deliver the view-2 proposals to everyone. The stalled pair (still
    // timed out at view 0) auto-joins with its own view-2 votes.
    let mut auto_joins = Vec::new();
    for vc in &vc2 {
        for (i, engine) in engines.iter().enumerate() {
            if let Ok(actions) = engine.handle_view_change(vc.clone()) {
                for action in actions {
                    if let Action::BroadcastViewChange(vc) = action {
                        auto_joins.push((i, vc));
                    }
                }
            }
        }
    }
    assert!(!auto_joins.is_empty(), "stalled validators must auto-join");
    // Auto-join fires at most once per engine per proposed view.
    assert!(auto_joins.len() <= 2);

    // One more delivery round: the auto-join votes complete the quorum.
    for (origin, vc) in &auto_joins {
        for (i, engine) in engines.iter().enumerate() {
            if i != *origin {
                let _ = engine.handle_view_change(vc.clone());
            }
        }
    }

    for engine in engines.iter() {
        assert_eq!(engine.current_view(), 2);
    }
}

/// A validator that has NOT timed out never auto-joins: one faulty node's
/// timeout must not cascade.
#[test]
fn live_validators_do_not_auto_join() {
    let cluster = cluster(4, 1);
    let engines = &cluster.engines;

    // Only engine 0 times out and proposes view 1.
    let actions = engines[0].on_timeout().unwrap();
    let vc = actions
        .into_iter()
        .find_map(|a| match a {
            Action::BroadcastViewChange(vc) => Some(vc),
            _ => None,
        })
        .unwrap();

    // A live validator records the vote but stays silent: no quorum, no
    // auto-join, no view movement.
    let reaction = engines[1].handle_view_change(vc).unwrap();
    assert!(reaction.is_empty());
    assert_eq!(engines[1].current_view(), 0);
}

/// Fast-forward: a proposal for the SAME height at view+1 advances the
/// view and produces a PREPARE vote; a proposal for a different height
/// does not fast-forward.
#[test]
fn fast_forward_only_for_same_height() {
    let cluster = cluster(4, 3);
    let receiver = &cluster.engines[0];
    let receiver_addr = cluster.keys[0].address();

    let make_proposal = |height: u64, view: u64| {
        let leader = leader_for(&cluster.set, height, view).unwrap();
        let leader_idx = cluster.engine_of(&leader.address);
        let block = block_at(height);
        let hash = block_hash(&block.header);
        let payload = consensus_payload(CHAIN_ID, Phase::Prepare, view, height, &hash);
        Proposal {
            view,
            block_number: height,
            block_hash: hash,
            block,
            proposer: leader.address,
            signature: cluster.keys[leader_idx].sign_consensus(&payload),
        }
    };

    // View 1 proposal for height 1 while we sit at view 0: fast-forward.
    let proposal = make_proposal(1, 1);
    let proposer = proposal.proposer;
    let actions = receiver.handle_proposal(proposal).unwrap();
    assert_eq!(receiver.current_view(), 1);
    if proposer != receiver_addr {
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SendVoteToLeader { vote, .. } if vote.phase == Phase::Prepare && vote.view == 1
        )));
    }

    // A proposal for height 2 at view 2 must NOT fast-forward even though
    // the view is exactly current + 1.
    let err = receiver.handle_proposal(make_proposal(2, 2)).unwrap_err();
    assert!(matches!(err, ConsensusError::ViewMismatch { current: 1, got: 2 }));
    assert_eq!(receiver.current_view(), 1);
}

/// After a view-change quorum, `start_round` proposes at the agreed view,
/// not the one that failed.
#[test]
fn min_next_view_floors_new_rounds() {
    let cluster = cluster(1, 1);
    let engine = &cluster.engines[0];

    // Single validator: its own timeout is instantly a quorum.
    let actions = engine.on_timeout().unwrap();
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::EnteredView(1))));
    assert_eq!(engine.current_view(), 1);

    let actions = engine.start_round(block_at(1)).unwrap();
    let proposal_view = actions
        .iter()
        .find_map(|a| match a {
            Action::BroadcastProposal(p) => Some(p.view),
            _ => None,
        })
        .unwrap();
    assert_eq!(proposal_view, 1);
}
