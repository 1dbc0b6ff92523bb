//! Single-slot handoff between the capture thread and the encoder thread.
//!
//! The frame channel has no buffer: a handoff only succeeds when the encoder is
//! already parked in [`RelayReceiver::recv`]. The capture buffer travels to the
//! encoder by value and comes back on the acknowledgement channel once the
//! encoder has its own copy, so the capture loop can reuse it.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

pub fn relay() -> (RelaySender, RelayReceiver) {
    let (frame_tx, frame_rx) = mpsc::sync_channel(0);
    // at most one acknowledgement is ever outstanding
    let (ack_tx, ack_rx) = mpsc::sync_channel(1);
    (
        RelaySender {
            frames: frame_tx,
            acks: ack_rx,
        },
        RelayReceiver {
            frames: frame_rx,
            acks: ack_tx,
        },
    )
}

/// Outcome of [`RelaySender::hand_off`].
#[derive(Debug)]
pub enum HandOff {
    /// The encoder copied the frame; the buffer is returned for reuse.
    Taken(Vec<u8>),
    /// The encoder was not waiting; the frame was not delivered.
    Busy(Vec<u8>),
    /// The encoder side is gone.
    Closed,
}

pub struct RelaySender {
    frames: SyncSender<Vec<u8>>,
    acks: Receiver<Vec<u8>>,
}

impl RelaySender {
    /// Offers `frame` to a parked encoder without waiting for one. On success,
    /// blocks until the encoder acknowledges.
    pub fn hand_off(&self, frame: Vec<u8>) -> HandOff {
        match self.frames.try_send(frame) {
            Ok(()) => match self.acks.recv() {
                Ok(buffer) => HandOff::Taken(buffer),
                Err(_) => HandOff::Closed,
            },
            Err(TrySendError::Full(frame)) => HandOff::Busy(frame),
            Err(TrySendError::Disconnected(_)) => HandOff::Closed,
        }
    }
}

pub struct RelayReceiver {
    frames: Receiver<Vec<u8>>,
    acks: SyncSender<Vec<u8>>,
}

impl RelayReceiver {
    /// Parks until the capture loop hands over a frame. `None` once the capture
    /// side is gone.
    pub fn recv(&self) -> Option<Relayed<'_>> {
        let data = self.frames.recv().ok()?;
        Some(Relayed {
            data: Some(data),
            acks: &self.acks,
        })
    }
}

/// A frame on loan from the capture loop. Dropping it acknowledges the handoff.
pub struct Relayed<'a> {
    data: Option<Vec<u8>>,
    acks: &'a SyncSender<Vec<u8>>,
}

impl Relayed<'_> {
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Copies the frame into `dst`, reusing its allocation, then acknowledges.
    pub fn copy_into(self, dst: &mut Vec<u8>) {
        dst.clear();
        dst.extend_from_slice(self.data());
    }
}

impl Drop for Relayed<'_> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            // capture side may already be gone
            let _ = self.acks.send(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    fn hand_off_until_taken(sender: &RelaySender, mut frame: Vec<u8>) -> Vec<u8> {
        loop {
            match sender.hand_off(frame) {
                HandOff::Taken(buffer) => return buffer,
                HandOff::Busy(kept) => {
                    frame = kept;
                    thread::sleep(Duration::from_millis(1));
                }
                HandOff::Closed => panic!("relay closed"),
            }
        }
    }

    #[test]
    fn test_hand_off_busy_without_parked_encoder() {
        let (sender, _receiver) = relay();
        match sender.hand_off(vec![1, 2, 3]) {
            HandOff::Busy(frame) => assert_eq!(frame, vec![1, 2, 3]),
            other => panic!("expected Busy, got {:?}", other),
        }
    }

    #[test]
    fn test_hand_off_closed_without_receiver() {
        let (sender, receiver) = relay();
        drop(receiver);
        assert!(matches!(sender.hand_off(vec![1]), HandOff::Closed));
    }

    #[test]
    fn test_hand_off_returns_buffer_after_copy() {
        let (sender, receiver) = relay();
        let encoder = thread::spawn(move || {
            let mut own = Vec::new();
            let frame = receiver.recv().unwrap();
            frame.copy_into(&mut own);
            own
        });

        let mut frame = Vec::with_capacity(64);
        frame.extend_from_slice(&[9, 8, 7]);
        let returned = hand_off_until_taken(&sender, frame);

        assert_eq!(returned, vec![9, 8, 7]);
        assert!(returned.capacity() >= 64);
        assert_eq!(encoder.join().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_recv_none_after_sender_dropped() {
        let (sender, receiver) = relay();
        drop(sender);
        assert!(receiver.recv().is_none());
    }
}
