//! Rendezvous fan-out of encoded images to whoever is waiting right now.
//!
//! A viewer parks a `oneshot` sender and awaits it. A broadcast pops parked
//! senders and completes them with the same [`EncodedImage`]; an image is never
//! stored for viewers that are not parked yet, so a late viewer simply gets the
//! next image. Dropping the waiting future closes its sender, and closed senders
//! are skipped and purged.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::oneshot;

use crate::frame::EncodedImage;

/// Upper bound of viewers served within a single broadcast cycle.
pub const DEFAULT_FANOUT: usize = 50;

struct Parked {
    waiters: VecDeque<oneshot::Sender<EncodedImage>>,
    closed: bool,
}

struct Shared {
    parked: Mutex<Parked>,
    arrived: Condvar,
    fanout: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_fanout(DEFAULT_FANOUT)
    }

    pub fn with_fanout(fanout: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                parked: Mutex::new(Parked {
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                arrived: Condvar::new(),
                fanout: fanout.max(1),
            }),
        }
    }

    pub fn fanout(&self) -> usize {
        self.shared.fanout
    }

    fn lock(&self) -> MutexGuard<'_, Parked> {
        self.shared
            .parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for the next broadcast image. `None` once the broadcaster is closed.
    ///
    /// Cancel-safe: dropping the future gives up the parked slot.
    pub async fn next_image(&self) -> Option<EncodedImage> {
        let receiver = {
            let mut parked = self.lock();
            if parked.closed {
                return None;
            }
            parked.waiters.retain(|tx| !tx.is_closed());
            let (tx, rx) = oneshot::channel();
            parked.waiters.push_back(tx);
            rx
        };
        self.shared.arrived.notify_one();
        receiver.await.ok()
    }

    /// Stream of images, one per broadcast the caller is parked for. Ends on close.
    pub fn images(self) -> BoxStream<'static, EncodedImage> {
        futures::stream::unfold(self, |broadcaster| async move {
            let image = broadcaster.next_image().await?;
            Some((image, broadcaster))
        })
        .boxed()
    }

    /// Hands `image` to up to `fanout` parked viewers without blocking.
    /// Returns how many viewers received it.
    pub fn offer(&self, image: &EncodedImage) -> usize {
        let mut parked = self.lock();
        let mut delivered = 0;
        while delivered < self.shared.fanout {
            let Some(tx) = parked.waiters.pop_front() else {
                break;
            };
            if tx.send(image.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// [`offer`](Self::offer), and if nobody was parked, block the calling
    /// thread until one viewer parks and deliver to that viewer only.
    ///
    /// Must run on a thread that may block. Returns 0 only once closed.
    pub fn broadcast(&self, image: EncodedImage) -> usize {
        let delivered = self.offer(&image);
        if delivered > 0 {
            return delivered;
        }
        self.deliver_one(image)
    }

    fn deliver_one(&self, mut image: EncodedImage) -> usize {
        let mut parked = self.lock();
        loop {
            if parked.closed {
                return 0;
            }
            while let Some(tx) = parked.waiters.pop_front() {
                match tx.send(image) {
                    Ok(()) => return 1,
                    Err(returned) => image = returned,
                }
            }
            parked = self
                .shared
                .arrived
                .wait(parked)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Releases every parked viewer with `None` and refuses new ones.
    pub fn close(&self) {
        let mut parked = self.lock();
        parked.closed = true;
        parked.waiters.clear();
        drop(parked);
        self.shared.arrived.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Viewers currently parked.
    pub fn waiting(&self) -> usize {
        self.lock()
            .waiters
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod broadcast_test;
