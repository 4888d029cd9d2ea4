//! Property-based coverage for spec §8's quantified invariants. Grounded
//! on the teacher's `proptest!` usage in `tests/dandelion_property.rs`
//! and `tests/property/node_invariants_tests.rs`.

use std::sync::Arc;

use proptest::prelude::*;

use channels_core::envelope::EnvelopeData;
use channels_core::script::ScriptItem;
use channels_core::storage::InMemoryStore;
use channels_core::time::FakeClock;
use channels_core::storage::MessageLog;

fn arbitrary_script_item() -> impl Strategy<Value = ScriptItem> {
    prop_oneof![
        any::<i64>().prop_map(ScriptItem::Number),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(ScriptItem::push_data),
    ]
}

proptest! {
    /// Invariant 1: `parse(wrap(E)) == E` at the script-item level, for
    /// any non-empty protocol-id list and any payload of script items.
    #[test]
    fn envelope_round_trips_for_arbitrary_payloads(
        protocol_ids in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..8), 1..4),
        payload in prop::collection::vec(arbitrary_script_item(), 0..8),
    ) {
        let envelope = EnvelopeData::new(protocol_ids, payload);
        let wire = envelope.write().unwrap();
        let parsed = EnvelopeData::read(&wire).unwrap();
        prop_assert_eq!(parsed, envelope);
    }

    /// Script-item numbers round-trip through the minimal push encoding
    /// for the full signed-integer range used by the wire format.
    #[test]
    fn script_number_round_trips(n in any::<i64>()) {
        let items = vec![ScriptItem::Number(n)];
        let encoded = channels_core::script::write_items(&items).unwrap();
        let decoded = channels_core::script::read_items(&encoded).unwrap();
        prop_assert_eq!(decoded, items);
    }
}

/// Mirrors `MessageLog::update_lowest_unprocessed` (spec §4.8): the
/// cursor only advances when the just-touched id is the cursor itself,
/// then walks forward while processed-and-not-awaiting. It deliberately
/// does not re-scan from 0, so touching an id behind an already-advanced
/// cursor does not retreat it — that laziness is spec-mandated, not a bug.
fn model_lowest_unprocessed(flags: &[(bool, bool)], cursor: u64, touched_id: u64) -> u64 {
    if touched_id != cursor {
        return cursor;
    }
    let mut cursor = cursor as usize;
    while cursor < flags.len() {
        let (is_processed, is_awaiting) = flags[cursor];
        if is_processed && !is_awaiting {
            cursor += 1;
        } else {
            break;
        }
    }
    cursor as u64
}

#[derive(Debug, Clone)]
enum LogOp {
    Append,
    MarkProcessed(usize),
    SetAwaiting(usize),
    ClearAwaiting(usize),
}

fn arbitrary_log_op() -> impl Strategy<Value = LogOp> {
    prop_oneof![
        3 => Just(LogOp::Append),
        4 => (0usize..12).prop_map(LogOp::MarkProcessed),
        2 => (0usize..12).prop_map(LogOp::SetAwaiting),
        2 => (0usize..12).prop_map(LogOp::ClearAwaiting),
    ]
}

proptest! {
    #[test]
    fn lowest_unprocessed_matches_naive_scan(ops in prop::collection::vec(arbitrary_log_op(), 0..60)) {
        let log = MessageLog::new(
            Arc::new(InMemoryStore::new()),
            "channels_client/channels/prop/incoming",
            100,
            Arc::new(FakeClock::new(0)),
        );
        let mut flags: Vec<(bool, bool)> = Vec::new();
        let mut model_cursor = 0u64;

        for op in ops {
            let touched = match op {
                LogOp::Append => {
                    log.append(vec![0u8; 4]);
                    flags.push((false, false));
                    None
                }
                LogOp::MarkProcessed(idx) => {
                    if idx < flags.len() {
                        log.mark_processed(idx as u64).unwrap();
                        flags[idx].0 = true;
                        Some(idx as u64)
                    } else {
                        None
                    }
                }
                LogOp::SetAwaiting(idx) => {
                    if idx < flags.len() {
                        log.set_awaiting_response(idx as u64).unwrap();
                        flags[idx].1 = true;
                        Some(idx as u64)
                    } else {
                        None
                    }
                }
                LogOp::ClearAwaiting(idx) => {
                    if idx < flags.len() {
                        log.clear_awaiting_response(idx as u64).unwrap();
                        flags[idx].1 = false;
                        Some(idx as u64)
                    } else {
                        None
                    }
                }
            };
            if let Some(touched_id) = touched {
                model_cursor = model_lowest_unprocessed(&flags, model_cursor, touched_id);
            }
            prop_assert_eq!(log.lowest_unprocessed(), model_cursor);
        }
    }
}
