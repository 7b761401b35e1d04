//! Viewer WebSocket bridge.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use tracing::{debug, info, warn};

use crate::hub::HubHandle;

/// Caps concurrent viewer connections.
#[derive(Debug)]
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The slot is held until the guard is dropped, so the guard
    /// can move into the upgraded connection task.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Forward hub events to one upgraded viewer socket until either side ends.
///
/// Viewers are read-only; inbound frames other than close are ignored.
pub async fn serve_viewer(socket: WebSocket, hub: HubHandle, _guard: ConnectionGuard) {
    let mut subscription = match hub.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Viewer rejected, hub unavailable");
            return;
        }
    };
    let viewer = subscription.id();
    info!(viewer, "Viewer connected");

    let (mut sender, mut receiver) = socket.split();

    let mut incoming_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    debug!("Viewer sent close frame");
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "Viewer receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.text.clone().into())).await.is_err() {
                            debug!(viewer, "Failed to send event, viewer disconnected");
                            break;
                        }
                    }
                    None => {
                        // Dropped by the hub for lagging, or the hub stopped.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = &mut incoming_task => {
                debug!(viewer, "Viewer stream ended");
                break;
            }
        }
    }

    incoming_task.abort();
    info!(viewer, "Viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_releases_on_drop() {
        let limiter = Arc::new(ConnectionLimiter::new(2));
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.current_count(), 2);
        drop(a);
        assert_eq!(limiter.current_count(), 1);
        assert!(limiter.try_acquire().is_some());
    }
}
