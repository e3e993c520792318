//! Point-to-point sessions between parties.
//!
//! A [`Session`] is one ordered, reliable, bidirectional conversation. The
//! [`LocalNetwork`] routes sessions between parties living in the same process
//! over tokio channels, which is enough to run every flow end to end in tests.

use crate::error::TransportError;
use crate::messages::FlowMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tally_core::PartyId;
use tally_scaffold::CanonicalBytes;
use tokio::sync::mpsc;
use tracing::debug;

const SESSION_BUFFER: usize = 16;
const INBOX_BUFFER: usize = 64;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new session with `party`.
    async fn open(&self, party: &PartyId) -> Result<Session, TransportError>;
}

pub struct Session {
    peer: PartyId,
    outgoing: mpsc::Sender<Vec<u8>>,
    incoming: mpsc::Receiver<Vec<u8>>,
}

impl Session {
    /// Two connected ends: the first talks to `b`, the second to `a`.
    pub fn pair(a: PartyId, b: PartyId) -> (Session, Session) {
        let (a_tx, b_rx) = mpsc::channel(SESSION_BUFFER);
        let (b_tx, a_rx) = mpsc::channel(SESSION_BUFFER);
        (
            Session {
                peer: b,
                outgoing: a_tx,
                incoming: a_rx,
            },
            Session {
                peer: a,
                outgoing: b_tx,
                incoming: b_rx,
            },
        )
    }

    pub fn peer(&self) -> PartyId {
        self.peer
    }

    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.outgoing
            .send(bytes)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }

    pub async fn send_message(&self, message: &FlowMessage) -> Result<(), TransportError> {
        let bytes = message
            .to_cbor()
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        debug!(peer = %self.peer, kind = message.kind(), "Sending message");
        self.send(bytes).await
    }

    pub async fn receive_message(&mut self) -> Result<FlowMessage, TransportError> {
        let bytes = self.receive().await?;
        FlowMessage::from_cbor(&bytes).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Sends `message` and waits for the peer's next message.
    pub async fn request(&mut self, message: &FlowMessage) -> Result<FlowMessage, TransportError> {
        self.send_message(message).await?;
        self.receive_message().await
    }
}

/// Incoming sessions addressed to one party.
pub struct Inbox(mpsc::Receiver<Session>);

impl Inbox {
    /// Next incoming session, or `None` once the party is disconnected.
    pub async fn accept(&mut self) -> Option<Session> {
        self.0.recv().await
    }
}

/// In-process router: each registered party gets an [`Inbox`], and
/// [`LocalNetwork::transport`] hands out per-party handles that open sessions
/// into those inboxes.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inboxes: Arc<Mutex<HashMap<PartyId, mpsc::Sender<Session>>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `party`, replacing any previous registration.
    pub fn register(&self, party: PartyId) -> Inbox {
        let (tx, rx) = mpsc::channel(INBOX_BUFFER);
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(party, tx);
        Inbox(rx)
    }

    /// Makes `party` unreachable. Its inbox yields `None` once drained.
    pub fn disconnect(&self, party: &PartyId) {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(party);
    }

    pub fn transport(&self, local: PartyId) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            local,
        }
    }

    fn route(&self, party: &PartyId) -> Option<mpsc::Sender<Session>> {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(party)
            .cloned()
    }
}

/// One party's view of a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalTransport {
    network: LocalNetwork,
    local: PartyId,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open(&self, party: &PartyId) -> Result<Session, TransportError> {
        let inbox = self
            .network
            .route(party)
            .ok_or(TransportError::Unreachable(*party))?;
        let (ours, theirs) = Session::pair(self.local, *party);
        inbox
            .send(theirs)
            .await
            .map_err(|_| TransportError::Unreachable(*party))?;
        Ok(ours)
    }
}
