//! Single-slot frame mailbox shared between the capture loop and its readers.
//!
//! The mailbox deliberately holds at most one frame: each publish overwrites
//! the previous slot, so consumers always see the freshest capture and never a
//! backlog. Readers use a bounded-wait acquisition and prefer "no data now"
//! over blocking past their deadline.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use crate::types::Frame;

/// How long a reader naps between lock attempts while its deadline has not
/// passed yet.
const ACQUIRE_RETRY: Duration = Duration::from_millis(1);

#[derive(Default)]
pub struct FrameMailbox {
    slot: Mutex<Option<Arc<Frame>>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot with a new frame. Called only by the capture loop.
    pub fn publish(&self, frame: Frame) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(Arc::new(frame));
        }
    }

    /// Fetch an independent copy of the current frame.
    ///
    /// The lock is held only long enough to clone the `Arc`; the (relatively
    /// expensive) pixel copy happens after release so a reader never stalls
    /// the writer. Returns `None` if the lock could not be acquired within
    /// `timeout` or the slot is still empty.
    pub fn take(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let shared = loop {
            match self.slot.try_lock() {
                Ok(slot) => break slot.as_ref().map(Arc::clone),
                Err(std::sync::TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    thread::sleep(ACQUIRE_RETRY);
                }
                Err(std::sync::TryLockError::Poisoned(_)) => return None,
            }
        };
        shared.map(|frame| (*frame).clone())
    }

    /// Drop whatever frame is currently buffered.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}
