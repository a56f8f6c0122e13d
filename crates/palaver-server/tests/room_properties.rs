//! Property-based tests for room history and membership.
//!
//! These verify invariants that must hold for all inputs: the history
//! bound, history ordering, and membership as a function of the applied
//! operation sequence.

use std::sync::Arc;

use palaver_proto::RoomMessage;
use palaver_server::{Room, RoomRegistry, Session, SessionId};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

fn message(i: usize) -> RoomMessage {
    RoomMessage { from: "prop".into(), text: format!("m{i}") }
}

/// One membership operation applied to a session slot.
#[derive(Debug, Clone, Copy)]
enum Op {
    Join(usize),
    Leave(usize),
}

fn op_strategy(slots: usize) -> impl Strategy<Value = Op> {
    prop_oneof![(0..slots).prop_map(Op::Join), (0..slots).prop_map(Op::Leave)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: history never exceeds the bound, and after M broadcasts it
    /// holds exactly the most recent min(M, bound) messages in order.
    #[test]
    fn prop_history_is_bounded_and_ordered(
        limit in 0usize..32,
        count in 0usize..96,
    ) {
        runtime().block_on(async {
            let room = Room::new("general", limit);

            for i in 0..count {
                room.broadcast(message(i), None).await;
            }

            let history = room.history().await;
            let expected = count.min(limit);
            prop_assert_eq!(history.len(), expected);

            for (offset, entry) in history.iter().enumerate() {
                let index = count - expected + offset;
                prop_assert_eq!(&entry.text, &format!("m{index}"));
            }
            Ok(())
        })?;
    }

    /// Property: after an arbitrary operation sequence, a session is a
    /// member exactly when its last operation was a join.
    #[test]
    fn prop_membership_matches_last_operation(
        ops in prop::collection::vec(op_strategy(8), 0..64),
    ) {
        runtime().block_on(async {
            let room = Room::new("general", 10);
            let sessions: Vec<_> =
                (0..8_u64).map(|i| Session::new(SessionId::new(i), 8)).collect();
            let mut last: [Option<bool>; 8] = [None; 8];

            for op in &ops {
                match *op {
                    Op::Join(slot) => {
                        room.join(&sessions[slot].0).await;
                        last[slot] = Some(true);
                    }
                    Op::Leave(slot) => {
                        room.remove_member(sessions[slot].0.id()).await;
                        last[slot] = Some(false);
                    }
                }
            }

            for (slot, (session, _rx)) in sessions.iter().enumerate() {
                let expected = last[slot] == Some(true);
                prop_assert_eq!(room.has_member(session.id()).await, expected);
            }
            Ok(())
        })?;
    }

    /// Property: a registry only ever holds one room per name, whatever
    /// the interleaving of creates and removes.
    #[test]
    fn prop_registry_rooms_are_unique_per_name(
        names in prop::collection::vec("[a-c]{1}", 1..24),
    ) {
        runtime().block_on(async {
            let registry = RoomRegistry::new(4);
            let mut handles: Vec<Arc<Room>> = Vec::new();

            for name in &names {
                handles.push(registry.get_or_create(name).await);
            }

            // Any two handles for the same name are the same instance.
            for (i, a) in handles.iter().enumerate() {
                for (j, b) in handles.iter().enumerate() {
                    if names[i] == names[j] {
                        prop_assert!(Arc::ptr_eq(a, b));
                    }
                }
            }

            let unique: std::collections::HashSet<_> = names.iter().collect();
            prop_assert_eq!(registry.len().await, unique.len());
            Ok(())
        })?;
    }
}
