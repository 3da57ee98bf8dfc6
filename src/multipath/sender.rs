//! Send loop.
//!
//! Drains retransmissions, asks the scheduler for a path, attaches ACK and
//! control frames, and hands the path to the packer until nothing more can
//! be sent. Packing, encryption and the socket live behind [`Session`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::agent::{self, PENALTY_REWARD};
use super::{Path, PathSet, Scheduler};
use crate::error::{Error, Result};
use crate::protocol::{Frame, PackedPacket, SentPacket, StreamFrame, WindowUpdateFrame};
use crate::types::{ByteCount, PathId, StreamId};

/// Connection-side collaborators of the send loop.
///
/// Implemented by the connection: the packer, the stream framer, flow
/// control and the physical sender.
pub trait Session {
    fn handshake_complete(&self) -> bool;

    /// Queue a control frame for the next packet on `path` (any path if `None`).
    fn queue_control_frame(&mut self, frame: Frame, path: Option<PathId>);

    /// Build the next packet for `path`; `None` when there is nothing to send.
    fn pack_packet(&mut self, path: &Path) -> Result<Option<PackedPacket>>;

    fn pack_handshake_retransmission(&mut self, packet: &SentPacket, path: &Path) -> Result<PackedPacket>;

    fn pack_ack_packet(&mut self, path: &Path) -> Result<PackedPacket>;

    /// Send a packet. Fails with [`Error::TooManyTrackedPackets`] when the
    /// path's sent-packet tracker is full.
    fn send_packed_packet(&mut self, packet: &PackedPacket, path: &Path) -> Result<()>;

    fn send_ping(&mut self, path: &Path) -> Result<()>;

    fn add_stream_frame_for_retransmission(&mut self, frame: StreamFrame);

    fn has_stream_frames_for_retransmission(&self) -> bool;

    /// Current receive window of a stream; `None` once the stream is closed.
    fn receive_window(&self, stream: StreamId) -> Option<ByteCount>;

    /// Schedule a fresh PATHS frame.
    fn schedule_paths_frame(&mut self);

    /// Window updates due now; `force` includes ones not strictly needed.
    fn window_update_frames(&mut self, force: bool) -> Vec<WindowUpdateFrame>;

    fn peer_blocked(&self) -> bool;

    fn clear_peer_blocked(&mut self);

    /// Pending CLOSE_PATH, ADD_ADDRESS and PATHS frames, in that order.
    fn pop_path_control_frames(&mut self) -> Vec<Frame>;

    /// Close the connection locally.
    fn close_local(&mut self, error: &Error);
}

/// Result of draining the paths' retransmission queues.
#[derive(Debug, Default)]
pub struct Retransmission {
    /// At least one packet was dequeued.
    pub has_retransmission: bool,
    /// Handshake-level packet to resend as is.
    pub handshake_packet: Option<SentPacket>,
    /// Path the last packet was dequeued from.
    pub from_path: Option<Arc<Path>>,
}

impl Scheduler {
    /// Drain every path's retransmission queue.
    ///
    /// Forward-secure packets are split back into frames for the packer. A
    /// handshake packet stops the scan and is returned, unless the handshake
    /// is already complete, in which case it is dropped.
    pub fn get_retransmission<S>(&mut self, paths: &PathSet, session: &mut S) -> Retransmission
    where
        S: Session + ?Sized,
    {
        let mut found = Retransmission::default();

        loop {
            let next = paths.read().values().find_map(|path| {
                path.dequeue_retransmission()
                    .map(|packet| (Arc::clone(path), packet))
            });
            let Some((path, packet)) = next else {
                break;
            };

            found.has_retransmission = true;
            found.from_path = Some(Arc::clone(&path));
            self.state.record_retransmission(path.id());

            if packet.is_handshake() {
                if session.handshake_complete() {
                    continue;
                }
                tracing::debug!(pn = %packet.packet_number, "Dequeueing handshake retransmission");
                found.handshake_packet = Some(packet);
                return found;
            }

            tracing::debug!(pn = %packet.packet_number, path = %path.id(), "Dequeueing retransmission");
            for frame in packet.frames_for_retransmission() {
                match frame {
                    Frame::Stream(f) => session.add_stream_frame_for_retransmission(f),
                    Frame::WindowUpdate(f) => {
                        // Only while the stream is open and no larger update went out since.
                        let current = session.receive_window(f.stream_id);
                        if current.is_some_and(|offset| f.byte_offset >= offset) {
                            session.queue_control_frame(Frame::WindowUpdate(f), Some(path.id()));
                        }
                    }
                    Frame::Paths(_) => session.schedule_paths_frame(),
                    other => session.queue_control_frame(other, Some(path.id())),
                }
            }
        }

        found
    }

    /// Send until no path can be selected or nothing is left to send.
    pub fn send_packets<S>(&mut self, paths: &PathSet, session: &mut S) -> Result<()>
    where
        S: Session + ?Sized,
    {
        for path in paths.read().values() {
            path.refresh_least_unacked();
        }

        let mut window_updates = session.window_update_frames(false);
        for f in &window_updates {
            session.queue_control_frame(Frame::WindowUpdate(*f), None);
        }

        loop {
            let retransmission = self.get_retransmission(paths, session);
            let has_stream_retransmission = session.has_stream_frames_for_retransmission();

            let selected = {
                let guard = paths.read();
                self.select_path(
                    &guard,
                    retransmission.has_retransmission,
                    has_stream_retransmission,
                    retransmission.from_path.as_ref(),
                )
            };
            let path = match selected {
                Ok(Some(path)) => path,
                Ok(None) => {
                    let updates = session.window_update_frames(false);
                    return self.ack_remaining_paths(paths, session, updates);
                }
                Err(e) => {
                    if matches!(e, Error::ZeroToleranceAbort(_)) {
                        session.close_local(&e);
                    }
                    return Err(e);
                }
            };

            if let Some(packet) = retransmission.handshake_packet {
                if let Some(swf) = path.stop_waiting_frame(true) {
                    session.queue_control_frame(swf.into(), Some(path.id()));
                }
                let packed = session.pack_handshake_retransmission(&packet, &path)?;
                session.send_packed_packet(&packed, &path)?;
                path.record_sent(packed.length);
                continue;
            }

            let ack = path.ack_frame(Instant::now());
            let has_ack = ack.is_some();
            if let Some(ack) = ack {
                session.queue_control_frame(ack.into(), Some(path.id()));
            }
            if has_ack || has_stream_retransmission {
                if let Some(swf) = path.stop_waiting_frame(has_stream_retransmission) {
                    session.queue_control_frame(swf.into(), Some(path.id()));
                }
            }

            for frame in session.pop_path_control_frames() {
                session.queue_control_frame(frame, Some(path.id()));
            }

            let sent = match self.perform_packet_sending(paths, session, &window_updates, &path) {
                Ok(sent) => sent,
                Err(e) => {
                    if matches!(e, Error::TooManyTrackedPackets) {
                        tracing::error!(connection = %self.connection_id, "Too many tracked packets, closing episode");
                        if self.learning() && self.config.training {
                            if let Some(agent) = self.agent.as_mut() {
                                agent.end_episode(self.connection_id, PENALTY_REWARD, false);
                            }
                        }
                    }
                    return Err(e);
                }
            };
            window_updates.clear();

            let Some(packet) = sent else {
                return self.ack_remaining_paths(paths, session, Vec::new());
            };

            if path.smoothed_rtt().is_zero() {
                self.duplicate_on_idle_path(paths, &path, packet);
            }

            if let Some(from) = retransmission.from_path.as_ref().filter(|p| p.potentially_failed()) {
                tracing::debug!(path = %from.id(), "Probing potentially failed path");
                session.send_ping(from)?;
            }
        }
    }

    fn perform_packet_sending<S>(
        &mut self,
        paths: &PathSet,
        session: &mut S,
        window_updates: &[WindowUpdateFrame],
        path: &Arc<Path>,
    ) -> Result<Option<SentPacket>>
    where
        S: Session + ?Sized,
    {
        if path.should_send_retransmittable_packet() {
            session.queue_control_frame(Frame::Ping, Some(path.id()));
        }

        let Some(packet) = session.pack_packet(path)? else {
            return Ok(None);
        };
        session.send_packed_packet(&packet, path)?;
        path.record_sent(packet.length);

        // Window updates go out twice.
        for f in window_updates {
            session.queue_control_frame(Frame::WindowUpdate(*f), Some(path.id()));
        }

        self.state.increment_quota(path.id());

        for frame in &packet.frames {
            if let Frame::Stream(f) = frame {
                if f.fin {
                    self.finish_stream(paths, f.stream_id);
                }
            }
        }

        Ok(Some(packet.to_sent_packet()))
    }

    /// Hedge a packet sent on an unmeasured path: if some other path has a
    /// lower quota and may send, queue a duplicate for the retransmission
    /// pass to move there.
    fn duplicate_on_idle_path(&self, paths: &PathSet, path: &Arc<Path>, packet: SentPacket) {
        let current_quota = self.state.quota(path.id());
        let guard = paths.read();
        let target = guard.iter().find(|(&id, other)| {
            !id.is_initial()
                && id != path.id()
                && self.state.quota(id) < current_quota
                && other.sending_allowed()
        });

        if let Some((id, _)) = target {
            tracing::debug!(
                pn = %packet.packet_number,
                from = %path.id(),
                to = %id,
                "Duplicating packet of unmeasured path"
            );
            path.duplicate_packet(packet);
        }
    }

    /// Log per-path statistics and close the learned policy's episode.
    fn finish_stream(&mut self, paths: &PathSet, stream: StreamId) {
        tracing::info!(stream = %stream, connection = %self.connection_id, "Stream finished");

        let mut max_rtt = Duration::ZERO;
        for (id, path) in paths.read().iter() {
            let sent = path.statistics();
            let received = path.receive_statistics();
            let telemetry = path.telemetry();
            tracing::info!(
                path = %id,
                sent = sent.packets_sent,
                retransmissions = sent.retransmissions,
                lost = sent.losses,
                received = received.packets,
                deadline_met = received.deadline_met,
                rtt = ?telemetry.smoothed_rtt,
                cwnd = telemetry.congestion_window,
                "Path statistics"
            );
            max_rtt = max_rtt.max(telemetry.smoothed_rtt);
        }

        if !self.learning() {
            return;
        }

        if self.config.training {
            let reward = agent::final_goodput_reward(self.created_at.elapsed(), max_rtt);
            if let Some(agent) = self.agent.as_mut() {
                agent.end_episode(self.connection_id, reward, false);
            }
        } else if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.close(self.connection_id) {
                tracing::warn!(error = %e, connection = %self.connection_id, "Failed to write experience");
            }
        }
    }

    /// Flush ACKs and window updates on every path.
    ///
    /// Runs once the loop can send no more. The initial path is skipped
    /// unless it has an ACK due.
    pub fn ack_remaining_paths<S>(
        &mut self,
        paths: &PathSet,
        session: &mut S,
        window_updates: Vec<WindowUpdateFrame>,
    ) -> Result<()>
    where
        S: Session + ?Sized,
    {
        let window_updates = if window_updates.is_empty() {
            let force = session.peer_blocked();
            session.window_update_frames(force)
        } else {
            window_updates
        };

        let now = Instant::now();
        for path in paths.snapshot() {
            let ack = path.ack_frame(now);
            for f in &window_updates {
                session.queue_control_frame(Frame::WindowUpdate(*f), Some(path.id()));
            }

            if ack.is_none() && window_updates.is_empty() {
                continue;
            }
            if path.is_initial() && ack.is_none() {
                continue;
            }

            if let Some(swf) = path.stop_waiting_frame(false) {
                session.queue_control_frame(swf.into(), Some(path.id()));
            }

            let packet = match ack {
                Some(ack) => {
                    session.queue_control_frame(ack.into(), Some(path.id()));
                    session.pack_ack_packet(&path)?
                }
                None => match session.pack_packet(&path)? {
                    Some(packet) => packet,
                    None => continue,
                },
            };
            session.send_packed_packet(&packet, &path)?;
            path.record_sent(packet.length);
        }

        session.clear_peer_blocked();
        Ok(())
    }
}
