//! In-memory routing index over persisted tickets.
//!
//! The registry is a projection of the store: it can be dropped and rebuilt
//! at any time. Every store mutation is mirrored here with [`TicketRegistry::upsert`]
//! before the mutating request completes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ticket::{ChannelId, RetryPolicy, Ticket, TicketError, TicketId, TicketStore, UserId};

#[derive(Debug, Default)]
struct Index {
    by_id: HashMap<TicketId, Ticket>,
    open_by_user: HashMap<UserId, TicketId>,
    latest_by_user: HashMap<UserId, TicketId>,
    by_channel: HashMap<ChannelId, TicketId>,
}

impl Index {
    fn insert(&mut self, ticket: &Ticket) {
        let id = ticket.id;
        let user = ticket.user_id;

        if let Some(channel) = ticket.channel_id {
            self.by_channel.insert(channel, id);
        }

        if ticket.status.is_open() {
            self.open_by_user.insert(user, id);
        } else if self.open_by_user.get(&user) == Some(&id) {
            self.open_by_user.remove(&user);
        }

        let newer = self
            .latest_by_user
            .get(&user)
            .map_or(true, |latest| *latest <= id);
        if newer {
            self.latest_by_user.insert(user, id);
        }

        self.by_id.insert(id, ticket.clone());
    }

    fn get(&self, id: Option<&TicketId>) -> Option<Ticket> {
        id.and_then(|id| self.by_id.get(id)).cloned()
    }
}

/// Ticket lookups by user and by channel, backed by the store on a miss.
pub struct TicketRegistry {
    index: RwLock<Index>,
    store: Arc<dyn TicketStore>,
    retry: RetryPolicy,
}

impl TicketRegistry {
    pub fn new(store: Arc<dyn TicketStore>, retry: RetryPolicy) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            store,
            retry,
        }
    }

    /// Replace the index with the store's full contents. Returns the ticket count.
    pub async fn rebuild(&self) -> Result<usize, TicketError> {
        let store = &self.store;
        let tickets = self
            .retry
            .run("list_tickets", move || store.list_tickets())
            .await?;

        let mut fresh = Index::default();
        for ticket in &tickets {
            fresh.insert(ticket);
        }
        *self.write() = fresh;

        tracing::debug!(tickets = tickets.len(), "Ticket registry rebuilt");
        Ok(tickets.len())
    }

    /// Mirror a ticket as returned by a store mutation.
    pub fn upsert(&self, ticket: &Ticket) {
        self.write().insert(ticket);
    }

    /// The user's open ticket.
    ///
    /// A user the index already knows about is answered from memory, since
    /// every mutation of their tickets passed through [`upsert`](Self::upsert).
    pub async fn open_ticket_for(&self, user: UserId) -> Result<Option<Ticket>, TicketError> {
        {
            let index = self.read();
            if index.latest_by_user.contains_key(&user) {
                return Ok(index.get(index.open_by_user.get(&user)));
            }
        }

        let store = &self.store;
        let found = self
            .retry
            .run("get_open_ticket", move || store.get_open_ticket(user))
            .await?;
        if let Some(ticket) = &found {
            self.upsert(ticket);
        }
        Ok(found)
    }

    /// The user's most recent ticket, whatever its status.
    pub async fn latest_ticket_for(&self, user: UserId) -> Result<Option<Ticket>, TicketError> {
        {
            let index = self.read();
            if let Some(ticket) = index.get(index.latest_by_user.get(&user)) {
                return Ok(Some(ticket));
            }
        }

        let store = &self.store;
        let found = self
            .retry
            .run("get_latest_ticket", move || store.get_latest_ticket(user))
            .await?;
        if let Some(ticket) = &found {
            self.upsert(ticket);
        }
        Ok(found)
    }

    pub async fn ticket(&self, id: TicketId) -> Result<Option<Ticket>, TicketError> {
        let cached = self.read().get(Some(&id));
        if cached.is_some() {
            return Ok(cached);
        }

        let store = &self.store;
        let found = self
            .retry
            .run("get_ticket", move || store.get_ticket(id))
            .await?;
        if let Some(ticket) = &found {
            self.upsert(ticket);
        }
        Ok(found)
    }

    pub async fn ticket_for_channel(
        &self,
        channel: ChannelId,
    ) -> Result<Option<Ticket>, TicketError> {
        {
            let index = self.read();
            if let Some(ticket) = index.get(index.by_channel.get(&channel)) {
                return Ok(Some(ticket));
            }
        }

        let store = &self.store;
        let found = self
            .retry
            .run("get_ticket_by_channel", move || store.get_ticket_by_channel(channel))
            .await?;
        if let Some(ticket) = &found {
            self.upsert(ticket);
        }
        Ok(found)
    }

    /// Owner of the ticket bound to `channel`, from memory only.
    pub fn cached_user_for_channel(&self, channel: ChannelId) -> Option<UserId> {
        let index = self.read();
        index
            .by_channel
            .get(&channel)
            .and_then(|id| index.by_id.get(id))
            .map(|t| t.user_id)
    }

    /// Open tickets whose channel was never bound.
    pub fn unbound_open_tickets(&self) -> Vec<Ticket> {
        let index = self.read();
        let mut tickets: Vec<Ticket> = index
            .open_by_user
            .values()
            .filter_map(|id| index.by_id.get(id))
            .filter(|t| t.is_unbound())
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.id);
        tickets
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
