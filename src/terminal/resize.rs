// ABOUTME: Fan-out of window resize notifications to subscribed terminal views
// The app publishes pane areas; each subscriber holds a ResizeListener until it unsubscribes

use ratatui::layout::Rect;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<Rect>>,
    removals: usize,
}

/// Source of resize notifications, shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct ResizeEvents {
    inner: Arc<Mutex<Subscribers>>,
}

impl ResizeEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> ResizeListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.senders.insert(id, tx);
        debug!("Resize listener {} subscribed", id);

        ResizeListener {
            id,
            events: self.clone(),
            rx,
            active: true,
        }
    }

    /// Deliver a new pane area to every live subscriber
    pub fn publish(&self, area: Rect) {
        let mut subs = self.lock();
        subs.senders.retain(|_, tx| tx.send(area).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().senders.len()
    }

    /// How many listeners have been removed over the lifetime of this source
    pub fn removals(&self) -> usize {
        self.lock().removals
    }

    fn remove(&self, id: u64) {
        let mut subs = self.lock();
        if subs.senders.remove(&id).is_some() {
            subs.removals += 1;
            debug!("Resize listener {} removed", id);
        }
    }
}

/// One subscription to [`ResizeEvents`]
#[derive(Debug)]
pub struct ResizeListener {
    id: u64,
    events: ResizeEvents,
    rx: mpsc::UnboundedReceiver<Rect>,
    active: bool,
}

impl ResizeListener {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Wait for the next area. Pending forever once unsubscribed.
    pub async fn recv(&mut self) -> Option<Rect> {
        if !self.active {
            return std::future::pending().await;
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Rect> {
        if !self.active {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Only the first call touches the source.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.events.remove(self.id);
        self.rx.close();
    }
}

impl Drop for ResizeListener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
