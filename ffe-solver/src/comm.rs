//! Point-to-point message passing between ranks

use std::{
    collections::VecDeque,
    sync::mpsc,
    time::{
        Duration,
        Instant,
    },
};

use parking_lot::Mutex;

use crate::{
    error::CommunicationError,
    grid::Face,
};

/// Distinguishes messages between the same pair of ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageTag(pub u32);

impl MessageTag {
    const HALO_BASE: u32 = 0x100;

    /// Tag of a halo slab, named after the face of the *receiving* rank whose
    /// guard cells it fills.
    pub fn halo(face: Face) -> Self {
        Self(Self::HALO_BASE + face.index() as u32)
    }
}

/// Communication between the ranks of one simulation.
///
/// Messages from one source with the same tag arrive in the order they were
/// sent. Messages with other tags or from other sources may be received in
/// any order.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(
        &self,
        destination: usize,
        tag: MessageTag,
        payload: Box<[f64]>,
    ) -> Result<(), CommunicationError>;

    /// Blocks until a message from `source` with `tag` arrives.
    fn receive(&self, source: usize, tag: MessageTag) -> Result<Box<[f64]>, CommunicationError>;
}

#[derive(Debug)]
struct Envelope {
    source: usize,
    message: Message,
}

#[derive(Debug)]
enum Message {
    Data { tag: MessageTag, payload: Box<[f64]> },

    /// Last message of a rank whose communicator was dropped
    Disconnect,
}

#[derive(Debug)]
struct Inbox {
    receiver: mpsc::Receiver<Envelope>,

    /// Messages that arrived before anyone asked for them
    pending: VecDeque<(usize, MessageTag, Box<[f64]>)>,

    /// Ranks that said goodbye. Their earlier messages may still be pending.
    disconnected: Vec<bool>,
}

impl Inbox {
    fn take_pending(&mut self, source: usize, tag: MessageTag) -> Option<Box<[f64]>> {
        let position = self
            .pending
            .iter()
            .position(|(pending_source, pending_tag, _)| {
                *pending_source == source && *pending_tag == tag
            })?;
        self.pending.remove(position).map(|(_, _, payload)| payload)
    }
}

/// Builds a set of connected in-process communicators, one per rank.
///
/// ```
/// # use ffe_solver::comm::{Communicator, LocalCluster, MessageTag};
/// let communicators = LocalCluster::new(2).build();
/// communicators[0].send(1, MessageTag(1), Box::new([1.0, 2.0])).unwrap();
/// let payload = communicators[1].receive(0, MessageTag(1)).unwrap();
/// assert_eq!(&*payload, &[1.0, 2.0]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct LocalCluster {
    size: usize,
    receive_timeout: Option<Duration>,
}

impl LocalCluster {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            receive_timeout: None,
        }
    }

    /// Give up on a receive after `timeout` instead of blocking forever.
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn build(self) -> Vec<LocalCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.size).map(|_| mpsc::channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| {
                LocalCommunicator {
                    rank,
                    senders: senders.clone(),
                    inbox: Mutex::new(Inbox {
                        receiver,
                        pending: VecDeque::new(),
                        disconnected: vec![false; self.size],
                    }),
                    receive_timeout: self.receive_timeout,
                }
            })
            .collect()
    }
}

/// One rank's end of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<mpsc::Sender<Envelope>>,
    inbox: Mutex<Inbox>,
    receive_timeout: Option<Duration>,
}

impl LocalCommunicator {
    fn check_peer(&self, peer: usize) -> Result<(), CommunicationError> {
        if peer < self.senders.len() {
            Ok(())
        }
        else {
            Err(CommunicationError::InvalidPeer {
                peer,
                world_size: self.senders.len(),
            })
        }
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(
        &self,
        destination: usize,
        tag: MessageTag,
        payload: Box<[f64]>,
    ) -> Result<(), CommunicationError> {
        self.check_peer(destination)?;

        tracing::trace!(
            rank = self.rank,
            destination,
            ?tag,
            len = payload.len(),
            "send"
        );

        self.senders[destination]
            .send(Envelope {
                source: self.rank,
                message: Message::Data { tag, payload },
            })
            .map_err(|_| CommunicationError::PeerUnreachable { peer: destination })
    }

    fn receive(&self, source: usize, tag: MessageTag) -> Result<Box<[f64]>, CommunicationError> {
        self.check_peer(source)?;

        let mut inbox = self.inbox.lock();
        if let Some(payload) = inbox.take_pending(source, tag) {
            return Ok(payload);
        }
        if inbox.disconnected[source] {
            return Err(CommunicationError::PeerUnreachable { peer: source });
        }

        let deadline = self.receive_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let envelope = if let Some(deadline) = deadline {
                inbox
                    .receiver
                    .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                    .map_err(|error| {
                        match error {
                            mpsc::RecvTimeoutError::Timeout => {
                                CommunicationError::Timeout { peer: source, tag: tag.0 }
                            }
                            mpsc::RecvTimeoutError::Disconnected => {
                                CommunicationError::PeerUnreachable { peer: source }
                            }
                        }
                    })?
            }
            else {
                inbox
                    .receiver
                    .recv()
                    .map_err(|_| CommunicationError::PeerUnreachable { peer: source })?
            };

            match envelope.message {
                Message::Data {
                    tag: received_tag,
                    payload,
                } => {
                    if envelope.source == source && received_tag == tag {
                        tracing::trace!(rank = self.rank, source, ?tag, "received");
                        return Ok(payload);
                    }
                    inbox
                        .pending
                        .push_back((envelope.source, received_tag, payload));
                }
                Message::Disconnect => {
                    tracing::debug!(
                        rank = self.rank,
                        peer = envelope.source,
                        "peer disconnected"
                    );
                    inbox.disconnected[envelope.source] = true;
                    // channels are FIFO, so nothing from this peer can follow
                    if envelope.source == source {
                        return Err(CommunicationError::PeerUnreachable { peer: source });
                    }
                }
            }
        }
    }
}

impl Drop for LocalCommunicator {
    fn drop(&mut self) {
        for (peer, sender) in self.senders.iter().enumerate() {
            if peer != self.rank {
                // peers that are already gone don't need to know
                let _ = sender.send(Envelope {
                    source: self.rank,
                    message: Message::Disconnect,
                });
            }
        }
    }
}
