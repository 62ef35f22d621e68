//! In-memory gossip fabric.
//!
//! The committee is static and known, so there is no discovery and
//! no wire protocol: every node registers a bounded inbox on a
//! shared bus and sends are fire-and-forget. A full inbox drops
//! the message and bumps a counter; the sender never blocks and
//! never learns. Absence of a reply is handled by the transaction
//! deadline, not by the transport.

use {
  crate::{knowledge::TopologyExport, pool::{Candidate, Vote}},
  dashmap::DashMap,
  serde::Serialize,
  std::sync::atomic::{AtomicU64, Ordering},
  tokio::sync::mpsc,
  tracing::debug,
};

#[derive(Debug, Clone)]
pub enum Message {
  /// A candidate looking for votes from relevant peers.
  VoteRequest { candidate: Candidate },
  /// A peer's signed verdict on a candidate.
  VoteResponse { vote: Vote },
  /// Ask a peer for its topology knowledge.
  TopologyRequest,
  /// A peer's exported topology knowledge.
  TopologyShare { export: TopologyExport },
}

#[derive(Debug, Clone)]
pub struct Envelope {
  pub from: u32,
  pub to: u32,
  pub message: Message,
}

#[derive(Debug, Default, Serialize)]
pub struct BusStats {
  pub sent: u64,
  pub delivered: u64,
  pub dropped: u64,
}

/// One bus per node group. Registration hands back the node's
/// receive side; everything else goes through `send`/`broadcast`.
pub struct MessageBus {
  inboxes: DashMap<u32, mpsc::Sender<Envelope>>,
  sent: AtomicU64,
  delivered: AtomicU64,
  dropped: AtomicU64,
}

impl MessageBus {
  pub fn new() -> Self {
    Self {
      inboxes: DashMap::new(),
      sent: AtomicU64::new(0),
      delivered: AtomicU64::new(0),
      dropped: AtomicU64::new(0),
    }
  }

  /// Registers a node and returns its inbox. Re-registering an AS
  /// replaces the previous inbox.
  pub fn register(
    &self,
    asn: u32,
    capacity: usize,
  ) -> mpsc::Receiver<Envelope> {
    let (tx, rx) = mpsc::channel(capacity);
    self.inboxes.insert(asn, tx);
    debug!("AS{asn} registered on the bus");
    rx
  }

  pub fn unregister(&self, asn: u32) {
    self.inboxes.remove(&asn);
  }

  /// Fire-and-forget send. Counted as delivered once it is queued
  /// on the receiver's inbox; a missing peer or a full inbox counts
  /// as dropped.
  pub fn send(&self, envelope: Envelope) {
    self.sent.fetch_add(1, Ordering::Relaxed);
    let inbox = match self.inboxes.get(&envelope.to) {
      Some(inbox) => inbox,
      None => {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        return;
      }
    };
    match inbox.try_send(envelope) {
      Ok(()) => {
        self.delivered.fetch_add(1, Ordering::Relaxed);
      }
      Err(_) => {
        self.dropped.fetch_add(1, Ordering::Relaxed);
      }
    }
  }

  pub fn broadcast(
    &self,
    from: u32,
    targets: impl IntoIterator<Item = u32>,
    message: Message,
  ) {
    for to in targets {
      self.send(Envelope {
        from,
        to,
        message: message.clone(),
      });
    }
  }

  pub fn registered(&self) -> Vec<u32> {
    let mut nodes: Vec<u32> =
      self.inboxes.iter().map(|entry| *entry.key()).collect();
    nodes.sort_unstable();
    nodes
  }

  pub fn stats(&self) -> BusStats {
    BusStats {
      sent: self.sent.load(Ordering::Relaxed),
      delivered: self.delivered.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
    }
  }
}

impl Default for MessageBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod test {
  use super::{Envelope, Message, MessageBus};

  #[tokio::test]
  async fn delivers_to_registered_nodes() {
    let bus = MessageBus::new();
    let mut inbox = bus.register(3, 16);

    bus.send(Envelope {
      from: 1,
      to: 3,
      message: Message::TopologyRequest,
    });
    let envelope = inbox.recv().await.unwrap();
    assert_eq!(envelope.from, 1);
    assert_eq!(bus.stats().delivered, 1);
  }

  #[tokio::test]
  async fn missing_peer_counts_as_dropped() {
    let bus = MessageBus::new();
    bus.send(Envelope {
      from: 1,
      to: 99,
      message: Message::TopologyRequest,
    });
    let stats = bus.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.dropped, 1);
  }

  #[tokio::test]
  async fn full_inbox_drops_instead_of_blocking() {
    let bus = MessageBus::new();
    let _inbox = bus.register(3, 1);

    for _ in 0..3 {
      bus.send(Envelope {
        from: 1,
        to: 3,
        message: Message::TopologyRequest,
      });
    }
    let stats = bus.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 2);
  }

  #[tokio::test]
  async fn broadcast_reaches_each_target() {
    let bus = MessageBus::new();
    let mut a = bus.register(3, 16);
    let mut b = bus.register(5, 16);

    bus.broadcast(1, [3, 5], Message::TopologyRequest);
    assert!(a.recv().await.is_some());
    assert!(b.recv().await.is_some());
    assert_eq!(bus.registered(), vec![3, 5]);
  }
}
