//! Receive-side ACK state machine tests.

use std::time::{Duration, Instant};

use mpquic_scheduler::ackhandler::{AckTrigger, ReceivedAckState};
use mpquic_scheduler::multipath::{Path, PathTelemetry, SchedulerConfig};
use mpquic_scheduler::types::{PacketNumber, PathId, Version};
use mpquic_scheduler::Error;

fn pn(n: u64) -> PacketNumber {
    PacketNumber(n)
}

fn receive_all(state: &mut ReceivedAckState, numbers: &[u64], now: Instant) {
    for &n in numbers {
        state.received_packet(pn(n), true, now).unwrap();
    }
}

#[test]
fn test_packet_number_zero_is_rejected() {
    let mut state = ReceivedAckState::default();
    let result = state.received_packet(PacketNumber::ZERO, true, Instant::now());
    assert!(matches!(result, Err(Error::InvalidPacketNumber(n)) if n == PacketNumber::ZERO));
    assert_eq!(state.trigger(), AckTrigger::Idle);
}

#[test]
fn test_packets_below_lower_limit_are_ignored() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[1, 2, 3, 5, 6], now);
    state.ack_frame(now).unwrap();

    state.advance_lower_limit(pn(5));
    let stats = state.statistics();

    for n in 1..=5 {
        state.received_packet(pn(n), true, now).unwrap();
    }
    assert_eq!(state.statistics(), stats);
    assert_eq!(state.trigger(), AckTrigger::Idle);
    assert_eq!(state.lower_limit(), pn(5));

    // Lowering the bound again has no effect
    state.advance_lower_limit(pn(2));
    assert_eq!(state.lower_limit(), pn(5));
}

#[test]
fn test_lower_limit_prunes_ranges() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[1, 2, 4, 7, 8], now);
    state.advance_lower_limit(pn(4));

    let ack = state.ack_frame(now).unwrap();
    assert_eq!(ack.largest_acked, pn(8));
    assert_eq!(ack.lowest_acked, pn(7));
    assert!(ack.ack_ranges.is_empty());
}

#[test]
fn test_ack_ranges_are_sorted_and_disjoint() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[9, 1, 3, 2, 6, 5, 12], now);

    let ack = state.ack_frame(now).unwrap();
    assert_eq!(ack.largest_acked, pn(12));
    assert_eq!(ack.lowest_acked, pn(1));
    assert!(ack.has_missing_ranges());

    let ranges = &ack.ack_ranges;
    assert_eq!(ranges[0].last, ack.largest_acked);
    for pair in ranges.windows(2) {
        // Descending with at least one missing packet in between
        assert!(pair[0].first > pair[1].last.next());
    }
    for r in ranges {
        assert!(r.first <= r.last);
    }
    for n in [1, 2, 3, 5, 6, 9, 12] {
        assert!(ack.acks_packet(pn(n)));
    }
    for n in [4, 7, 8, 10, 11] {
        assert!(!ack.acks_packet(pn(n)));
    }
}

#[test]
fn test_second_ack_frame_is_none() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[1, 2], now);

    assert!(state.ack_frame(now).is_some());
    assert!(state.ack_frame(now).is_none());
    assert!(state.ack_frame(now + Duration::from_secs(1)).is_none());
    assert_eq!(state.trigger(), AckTrigger::Idle);
}

#[test]
fn test_triggers_are_exclusive() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    state.received_packet(pn(1), true, now).unwrap();
    state.ack_frame(now).unwrap();

    state.received_packet(pn(2), true, now).unwrap();
    assert!(matches!(state.trigger(), AckTrigger::Alarm(_)));

    // Hard trigger cancels the alarm
    state.received_packet(pn(3), true, now).unwrap();
    assert_eq!(state.trigger(), AckTrigger::Queued);
    assert!(state.alarm_timeout().is_none());

    state.ack_frame(now).unwrap();
    assert_eq!(state.trigger(), AckTrigger::Idle);
    assert!(state.alarm_timeout().is_none());
}

#[test]
fn test_reported_missing_packet_queues_ack() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[1, 3], now);
    let ack = state.ack_frame(now).unwrap();
    assert_eq!(ack.largest_acked, pn(3));

    // Packet 2 was reported missing
    state.received_packet(pn(2), false, now).unwrap();
    assert_eq!(state.trigger(), AckTrigger::Queued);
}

#[test]
fn test_new_range_above_last_ack_queues_ack() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[1, 2], now);
    state.ack_frame(now).unwrap();

    state.received_packet(pn(5), false, now).unwrap();
    assert_eq!(state.trigger(), AckTrigger::Queued);
}

#[test]
fn test_duplicates_are_ignored() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    receive_all(&mut state, &[1, 2], now);
    state.ack_frame(now).unwrap();

    state.received_packet(pn(2), true, now).unwrap();
    assert_eq!(state.trigger(), AckTrigger::Idle);
    assert_eq!(state.statistics().packets, 2);
}

#[test]
fn test_periodic_ack_only_before_v39() {
    let now = Instant::now();
    let mut new = ReceivedAckState::new(Version::V39);
    let mut old = ReceivedAckState::new(Version::V38);
    for state in [&mut new, &mut old] {
        state.received_packet(pn(1), false, now).unwrap();
        state.ack_frame(now).unwrap();
        for n in 2..=21 {
            state.received_packet(pn(n), false, now).unwrap();
        }
    }
    assert_eq!(new.trigger(), AckTrigger::Idle);
    assert_eq!(old.trigger(), AckTrigger::Queued);
}

#[test]
fn test_ack_carries_receipt_time_of_largest() {
    let t0 = Instant::now();
    let t1 = t0 + Duration::from_millis(3);
    let mut state = ReceivedAckState::default();
    state.received_packet(pn(4), true, t1).unwrap();
    state.received_packet(pn(2), true, t1 + Duration::from_millis(1)).unwrap();

    let ack = state.ack_frame(t1).unwrap();
    assert_eq!(ack.largest_acked, pn(4));
    assert_eq!(ack.packet_received_time, t1);
}

#[test]
fn test_deadline_met_counted_once() {
    let now = Instant::now();
    let mut state = ReceivedAckState::default();
    state.received_packet(pn(1), true, now).unwrap();
    state.record_deadline_outcome(Some(now + Duration::from_millis(10)), now);

    let stats = state.statistics();
    assert_eq!(stats.deadline_met, 1);
    assert_eq!(stats.deadline_missed, 0);

    let ack = state.ack_frame(now).unwrap();
    assert_eq!(ack.num_meet_deadline, 1);
    assert_eq!(ack.num_has_deadline, 1);

    // Since-last-ack counters reset; lifetime ones do not
    state.received_packet(pn(2), true, now).unwrap();
    state.record_deadline_outcome(Some(now), now);
    let ack = state.ack_frame(now + Duration::from_secs(1)).unwrap();
    assert_eq!(ack.num_meet_deadline, 0);
    assert_eq!(ack.num_has_deadline, 1);

    let stats = state.statistics();
    assert_eq!(stats.with_deadline, 2);
    assert_eq!(stats.deadline_met, 1);
    assert_eq!(stats.deadline_missed, 1);
}

#[test]
fn test_configured_ack_delay_on_path() {
    let now = Instant::now();
    let config = SchedulerConfig {
        ack_send_delay: Duration::from_millis(5),
        ..Default::default()
    };
    let path = Path::with_ack_state(PathId(1), PathTelemetry::default(), config.ack_state(Version::V39));

    path.received_packet(pn(1), true, now).unwrap();
    assert!(path.ack_frame(now).is_some());

    path.received_packet(pn(2), true, now).unwrap();
    assert!(path.ack_frame(now + Duration::from_millis(4)).is_none());
    assert!(path.ack_frame(now + Duration::from_millis(5)).is_some());
    assert_eq!(path.receive_statistics().packets, 2);
}

#[test]
fn test_deadline_outcomes_through_path() {
    let now = Instant::now();
    let path = Path::new(PathId(2));

    path.received_packet(pn(1), true, now).unwrap();
    path.ack_state_mut(|state| {
        state.record_deadline_outcome(Some(now + Duration::from_millis(10)), now);
    });
    path.received_packet(pn(2), true, now).unwrap();
    path.ack_state_mut(|state| {
        state.record_deadline_outcome(Some(now - Duration::from_millis(1)), now);
    });

    let ack = path.ack_frame(now).unwrap();
    assert_eq!(ack.num_meet_deadline, 1);
    assert_eq!(ack.num_has_deadline, 2);

    let stats = path.receive_statistics();
    assert_eq!(stats.deadline_met, 1);
    assert_eq!(stats.deadline_missed, 1);
    assert_eq!(stats.with_deadline, 2);
}
