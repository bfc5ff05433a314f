//! Registry of accepted and connected sockets.
//!
//! Entries live in a generational slot map so that a [`ConnectionId`] handed
//! out by [`ConnectionRegistry::insert`] stays valid while other entries come
//! and go, and never resolves again once its own entry is removed. The
//! registry also keeps acceptance order: `nth(i)` is the i-th oldest live
//! connection, and removing an entry shifts every later position down by one.

use std::fmt;
use std::ops::{Index, IndexMut};

use log::info;
use socket2::Socket;

use crate::address::AddressSpec;

/// Stable handle to a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    slot: u32,
    generation: u32,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

/// One open socket, its peer address and the protocol state attached to it.
///
/// Dropping the entry closes the socket and drops the session payload.
#[derive(Debug)]
pub struct AcceptedConnection<S> {
    pub socket: Socket,
    pub address: AddressSpec,
    pub session: S,
}

#[derive(Debug)]
struct Slot<S> {
    generation: u32,
    entry: Option<AcceptedConnection<S>>,
}

/// Owner of every open connection of one role.
///
/// `S` is the per-connection session payload built by the accept or connect
/// hook. Removing an entry, clearing the registry or dropping it closes the
/// sockets and drops their sessions exactly once.
#[derive(Debug)]
pub struct ConnectionRegistry<S> {
    slots: Vec<Slot<S>>,
    free: Vec<u32>,
    order: Vec<ConnectionId>,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ConnectionRegistry<S> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Appends a connection; its position is the previous length.
    pub fn insert(&mut self, socket: Socket, address: AddressSpec, session: S) -> ConnectionId {
        let entry = AcceptedConnection {
            socket,
            address,
            session,
        };

        let id = match self.free.pop() {
            Some(slot) => {
                let slot_ref = &mut self.slots[slot as usize];
                slot_ref.entry = Some(entry);
                ConnectionId {
                    slot,
                    generation: slot_ref.generation,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ConnectionId {
                    slot,
                    generation: 0,
                }
            }
        };

        self.order.push(id);
        id
    }

    /// Closes the socket and drops the session. Returns false for a stale id.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.take(id).is_some()
    }

    /// Removes an entry and hands it back instead of dropping it.
    pub fn take(&mut self, id: ConnectionId) -> Option<AcceptedConnection<S>> {
        let slot = self.slots.get_mut(id.slot as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.order.retain(|live| *live != id);
        Some(entry)
    }

    /// Closes and drops every entry.
    pub fn clear(&mut self) {
        let count = self.order.len();
        for id in std::mem::take(&mut self.order) {
            if let Some(slot) = self.slots.get_mut(id.slot as usize) {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.slot);
            }
        }
        if count > 0 {
            info!("Closed {} connection(s)", count);
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Live ids in acceptance order. A snapshot, so callers may remove while iterating.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.order.clone()
    }

    /// Id of the entry at `position` in acceptance order.
    pub fn nth(&self, position: usize) -> Option<ConnectionId> {
        self.order.get(position).copied()
    }

    /// Current position of `id` in acceptance order.
    pub fn position(&self, id: ConnectionId) -> Option<usize> {
        self.order.iter().position(|live| *live == id)
    }

    /// Whether `id` still names a live entry.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    /// Entry for `id`; `None` once the entry was removed, even if its slot
    /// has been reused since.
    pub fn get(&self, id: ConnectionId) -> Option<&AcceptedConnection<S>> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut AcceptedConnection<S>> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Socket of a live entry.
    pub fn socket(&self, id: ConnectionId) -> Option<&Socket> {
        self.get(id).map(|entry| &entry.socket)
    }

    /// Peer address of a live entry, in canonical form for accepted peers.
    pub fn address(&self, id: ConnectionId) -> Option<&AddressSpec> {
        self.get(id).map(|entry| &entry.address)
    }

    /// Session payload of a live entry.
    pub fn session(&self, id: ConnectionId) -> Option<&S> {
        self.get(id).map(|entry| &entry.session)
    }

    pub fn session_mut(&mut self, id: ConnectionId) -> Option<&mut S> {
        self.get_mut(id).map(|entry| &mut entry.session)
    }

    /// Live entries in acceptance order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &AcceptedConnection<S>)> {
        self.order
            .iter()
            .filter_map(move |id| self.get(*id).map(|entry| (*id, entry)))
    }
}

impl<S> Index<ConnectionId> for ConnectionRegistry<S> {
    type Output = AcceptedConnection<S>;

    fn index(&self, id: ConnectionId) -> &Self::Output {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("connection {} is not in the registry", id),
        }
    }
}

impl<S> IndexMut<ConnectionId> for ConnectionRegistry<S> {
    fn index_mut(&mut self, id: ConnectionId) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(entry) => entry,
            None => panic!("connection {} is not in the registry", id),
        }
    }
}
