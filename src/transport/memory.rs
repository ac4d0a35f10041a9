use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{Envelope, Subscription, Transport};
use crate::error::Result;

struct Subscriber {
    owner: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

struct GroupMember {
    owner: u64,
    consumer: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// One consumer group on one channel.
///
/// Messages published while the group has no live member are kept in
/// `backlog` and handed to the next member that joins, the way a durable
/// stream keeps undelivered entries for its group.
#[derive(Default)]
struct Group {
    members: Vec<GroupMember>,
    cursor: usize,
    backlog: VecDeque<Envelope>,
}

impl Group {
    /// Deliver to the next live member in round-robin order.
    fn deliver(&mut self, envelope: Envelope) {
        self.members.retain(|m| !m.tx.is_closed());
        let mut envelope = envelope;
        while !self.members.is_empty() {
            let index = self.cursor % self.members.len();
            self.cursor = self.cursor.wrapping_add(1);
            match self.members[index].tx.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    envelope = returned;
                    self.members.remove(index);
                }
            }
        }
        self.backlog.push_back(envelope);
    }
}

#[derive(Default)]
struct BusState {
    plain: HashMap<String, Vec<Subscriber>>,
    groups: HashMap<String, HashMap<String, Group>>,
}

/// In-process message hub. Each coordinator gets its own [`MemoryTransport`]
/// handle from [`MemoryBus::connect`]; unsubscribing through one handle never
/// affects another handle's subscriptions.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
    next_owner: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemoryTransport {
        MemoryTransport {
            bus: self.clone(),
            owner: self.next_owner.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of live plain subscribers on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let state = self.state.lock().await;
        state
            .plain
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
    }

    /// Messages waiting for a member of `group` on `channel`.
    pub async fn backlog_len(&self, channel: &str, group: &str) -> usize {
        let state = self.state.lock().await;
        state
            .groups
            .get(channel)
            .and_then(|groups| groups.get(group))
            .map_or(0, |g| g.backlog.len())
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    bus: MemoryBus,
    owner: u64,
}

impl MemoryTransport {
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    /// Drop every subscription held through this handle, as a crashed
    /// process would.
    pub async fn disconnect(&self) {
        let mut state = self.bus.state.lock().await;
        for subs in state.plain.values_mut() {
            subs.retain(|s| s.owner != self.owner);
        }
        for groups in state.groups.values_mut() {
            for group in groups.values_mut() {
                group.members.retain(|m| m.owner != self.owner);
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let envelope = Envelope {
            channel: channel.to_string(),
            payload,
        };

        let mut state = self.bus.state.lock().await;
        if let Some(subs) = state.plain.get_mut(channel) {
            subs.retain(|s| s.tx.send(envelope.clone()).is_ok());
        }
        if let Some(groups) = state.groups.get_mut(channel) {
            for group in groups.values_mut() {
                group.deliver(envelope.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.bus.state.lock().await;
        state
            .plain
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                owner: self.owner,
                tx,
            });
        Ok(Subscription::new(channel, rx))
    }

    async fn subscribe_with_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.bus.state.lock().await;
        let group = state
            .groups
            .entry(channel.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default();

        for envelope in group.backlog.drain(..) {
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(envelope);
        }
        group.members.retain(|m| !m.tx.is_closed());
        group.members.push(GroupMember {
            owner: self.owner,
            consumer: consumer.to_string(),
            tx,
        });
        tracing::debug!(channel, consumer, members = group.members.len(), "Joined consumer group");

        Ok(Subscription::new(channel, rx))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.bus.state.lock().await;
        if let Some(subs) = state.plain.get_mut(channel) {
            subs.retain(|s| s.owner != self.owner);
            if subs.is_empty() {
                state.plain.remove(channel);
            }
        }
        if let Some(groups) = state.groups.get_mut(channel) {
            for group in groups.values_mut() {
                group.members.retain(|m| m.owner != self.owner);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for GroupMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupMember")
            .field("owner", &self.owner)
            .field("consumer", &self.consumer)
            .finish()
    }
}
