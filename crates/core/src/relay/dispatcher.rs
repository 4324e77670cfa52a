//! Per-conversation event queues in front of the router.
//!
//! Every ticket's events are handled strictly in arrival order while
//! unrelated conversations run concurrently. Each key gets its own worker
//! task fed by an mpsc channel; workers retire after sitting idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ticket::{ChannelId, UserId};

use super::router::RelayRouter;
use super::types::{CommandSource, InboundEvent};

/// Ordering key for an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    User(UserId),
    /// A channel whose owner is not known yet.
    Channel(ChannelId),
}

struct Worker {
    tx: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
    generation: u64,
}

type WorkerMap = HashMap<DispatchKey, Worker>;

/// Fans inbound events out to per-key workers.
///
/// Clone is cheap; clones share the same workers.
#[derive(Clone)]
pub struct RelayDispatcher {
    router: Arc<RelayRouter>,
    workers: Arc<Mutex<WorkerMap>>,
    generations: Arc<AtomicU64>,
    idle_timeout: Duration,
}

impl RelayDispatcher {
    pub fn new(router: Arc<RelayRouter>, idle_timeout: Duration) -> Self {
        Self {
            router,
            workers: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
            idle_timeout,
        }
    }

    /// Queue an event behind earlier events with the same key.
    pub fn dispatch(&self, event: InboundEvent) {
        let key = self.key_for(&event);
        let mut workers = lock(&self.workers);

        let event = match workers.get(&key) {
            Some(worker) => match worker.tx.send(event) {
                Ok(()) => return,
                // Worker is gone; start a new one below.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker starts, so this cannot fail.
        let _ = tx.send(event);

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(run_worker(
            key,
            generation,
            rx,
            Arc::clone(&self.router),
            Arc::clone(&self.workers),
            self.idle_timeout,
        ));
        workers.insert(
            key,
            Worker {
                tx,
                handle,
                generation,
            },
        );
        tracing::debug!(?key, "Started relay worker");
    }

    /// Number of live workers.
    pub fn active_workers(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Stop accepting events and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        let drained: Vec<Worker> = lock(&self.workers).drain().map(|(_, w)| w).collect();
        let count = drained.len();

        let handles: Vec<JoinHandle<()>> = drained
            .into_iter()
            .map(|worker| {
                drop(worker.tx);
                worker.handle
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Relay worker panicked: {}", e);
            }
        }

        tracing::info!(workers = count, "Relay dispatcher stopped");
    }

    fn key_for(&self, event: &InboundEvent) -> DispatchKey {
        let channel = match event {
            InboundEvent::UserMessage { user, .. } => return DispatchKey::User(user.id),
            InboundEvent::Command(command) => match &command.source {
                CommandSource::User(user) => return DispatchKey::User(user.id),
                CommandSource::Channel(channel) => *channel,
            },
            InboundEvent::ChannelMessage { channel, .. } => *channel,
        };

        // Admin replies share the owner's queue so both sides stay ordered.
        match self.router.registry().cached_user_for_channel(channel) {
            Some(user) => DispatchKey::User(user),
            None => DispatchKey::Channel(channel),
        }
    }
}

async fn run_worker(
    key: DispatchKey,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<InboundEvent>,
    router: Arc<RelayRouter>,
    workers: Arc<Mutex<WorkerMap>>,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(event)) => {
                router.process(event).await;
            }
            Ok(None) => break,
            Err(_) => {
                // Senders only push while holding the map lock, so an empty
                // queue seen under the lock stays empty once we deregister.
                let pending = {
                    let mut map = lock(&workers);
                    let pending = rx.try_recv().ok();
                    if pending.is_none()
                        && map
                            .get(&key)
                            .is_some_and(|worker| worker.generation == generation)
                    {
                        map.remove(&key);
                    }
                    pending
                };

                match pending {
                    Some(event) => {
                        router.process(event).await;
                    }
                    None => {
                        tracing::debug!(?key, "Relay worker retired");
                        break;
                    }
                }
            }
        }
    }
}

fn lock(workers: &Mutex<WorkerMap>) -> MutexGuard<'_, WorkerMap> {
    workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use crate::ticket::TicketStatus;

    #[tokio::test]
    async fn test_same_user_events_keep_order() {
        let h = fixtures::harness();
        h.messenger
            .set_relay_latency(Duration::from_millis(5))
            .await;
        let dispatcher = RelayDispatcher::new(Arc::clone(&h.router), Duration::from_secs(5));

        for i in 0..5 {
            dispatcher.dispatch(fixtures::user_message(1, "alice", &format!("msg {}", i)));
        }
        dispatcher.shutdown().await;

        let ticket = h.store.get_open_ticket(UserId(1)).await.unwrap().unwrap();
        let channel = ticket.channel_id.unwrap();
        let texts: Vec<String> = h
            .messenger
            .relayed_to_channel(channel)
            .await
            .into_iter()
            .filter_map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_admin_reply_shares_owner_queue() {
        let h = fixtures::harness();
        let dispatcher = RelayDispatcher::new(Arc::clone(&h.router), Duration::from_secs(5));

        dispatcher.dispatch(fixtures::user_message(1, "alice", "hello"));
        dispatcher.shutdown().await;

        let ticket = h.store.get_open_ticket(UserId(1)).await.unwrap().unwrap();
        let channel = ticket.channel_id.unwrap();
        assert_eq!(
            dispatcher.key_for(&fixtures::channel_message(channel, "hi")),
            DispatchKey::User(UserId(1))
        );
        assert_eq!(
            dispatcher.key_for(&fixtures::channel_message(ChannelId(9999), "hi")),
            DispatchKey::Channel(ChannelId(9999))
        );
    }

    #[tokio::test]
    async fn test_close_then_message_applied_in_order() {
        let h = fixtures::harness();
        let dispatcher = RelayDispatcher::new(Arc::clone(&h.router), Duration::from_secs(5));

        dispatcher.dispatch(fixtures::user_message(1, "alice", "first"));
        dispatcher.dispatch(fixtures::button_press(
            1,
            "alice",
            crate::relay::ButtonAction::Close(fixtures::ticket(1)),
        ));
        dispatcher.dispatch(fixtures::user_message(1, "alice", "after close"));
        dispatcher.shutdown().await;

        let ticket = h.store.get_latest_ticket(UserId(1)).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Closed);
        let relayed = h
            .messenger
            .relayed_to_channel(ticket.channel_id.unwrap())
            .await;
        assert_eq!(relayed.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_workers_retire() {
        let h = fixtures::harness();
        let dispatcher =
            RelayDispatcher::new(Arc::clone(&h.router), Duration::from_millis(20));

        dispatcher.dispatch(fixtures::user_message(1, "alice", "hello"));
        dispatcher.dispatch(fixtures::user_message(2, "bob", "hello"));
        assert_eq!(dispatcher.active_workers(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.active_workers(), 0);

        // A retired key gets a fresh worker.
        dispatcher.dispatch(fixtures::user_message(1, "alice", "again"));
        dispatcher.shutdown().await;
        assert_eq!(h.store.list_tickets().await.unwrap().len(), 2);
    }
}
