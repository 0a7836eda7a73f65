//! Single-slot synchronous hand-off between the application and protocol roles.
//!
//! A miss blocks the application role in [`Rendezvous::wait_for_sim`]. The protocol role
//! installs the reply, calls [`Rendezvous::wake_app`] and then blocks in
//! [`Rendezvous::wait_for_app`] until the application role has re-acquired its L1 lock
//! and called [`Rendezvous::wake_sim`]. Both channels have zero capacity, so every signal
//! is a rendezvous. Closing the hand-off fails every current and future wait.

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;

use crate::common::{ProtocolError, ProtocolResult, TileId};

/// Hand-off channels of one tile.
#[derive(Debug)]
pub struct Rendezvous {
    tile: TileId,
    to_app: (Sender<()>, Receiver<()>),
    to_sim: (Sender<()>, Receiver<()>),
    closer: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl Rendezvous {
    /// Creates the hand-off of `tile`.
    pub fn new(tile: TileId) -> Self {
        let (closer, closed) = bounded(0);
        Self {
            tile,
            to_app: bounded(0),
            to_sim: bounded(0),
            closer: Mutex::new(Some(closer)),
            closed,
        }
    }

    fn signal(&self, tx: &Sender<()>) -> ProtocolResult<()> {
        select! {
            send(tx, ()) -> res => res.map_err(|_| ProtocolError::TileShutDown(self.tile)),
            recv(self.closed) -> _ => Err(ProtocolError::TileShutDown(self.tile)),
        }
    }

    fn wait(&self, rx: &Receiver<()>) -> ProtocolResult<()> {
        select! {
            recv(rx) -> res => res.map_err(|_| ProtocolError::TileShutDown(self.tile)),
            recv(self.closed) -> _ => Err(ProtocolError::TileShutDown(self.tile)),
        }
    }

    /// Application role: blocks until the protocol role has installed the reply.
    pub fn wait_for_sim(&self) -> ProtocolResult<()> {
        self.wait(&self.to_app.1)
    }

    /// Protocol role: releases the blocked application role.
    pub fn wake_app(&self) -> ProtocolResult<()> {
        self.signal(&self.to_app.0)
    }

    /// Protocol role: blocks until the application role holds its L1 lock again.
    pub fn wait_for_app(&self) -> ProtocolResult<()> {
        self.wait(&self.to_sim.1)
    }

    /// Application role: releases the waiting protocol role.
    pub fn wake_sim(&self) -> ProtocolResult<()> {
        self.signal(&self.to_sim.0)
    }

    /// Fails every current and future wait.
    pub fn close(&self) {
        drop(self.closer.lock().take());
    }
}
