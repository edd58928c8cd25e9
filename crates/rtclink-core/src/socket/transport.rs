use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SocketError;
use crate::token::Credentials;

use super::SocketKind;
use super::machine::Command;

/// WebSocket normal-closure code, used whenever the core closes a transport itself.
pub const NORMAL_CLOSURE: u16 = 1000;

/// What a transport reports back about its connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal<K: SocketKind> {
    /// Handshake acknowledged by the server.
    Ack(K::Ack),
    /// Health-check response. Only refreshes liveness.
    HealthCheck,
    /// Error frame from the server, with its reconnect hint if it carried one.
    ServerError { error: SocketError, hint: K::Hint },
    Message(Vec<u8>),
    Closed { code: u16, reason: String },
    Failure(SocketError),
}

/// An open connection.
pub trait Transport: Send + Sync {
    fn send(&self, payload: Vec<u8>) -> Result<(), SocketError>;
    fn send_health_check(&self) -> Result<(), SocketError>;
    fn close(&self, code: u16, reason: &str);
}

/// Opens transports for one socket kind. Implemented by the host.
#[async_trait]
pub trait TransportFactory<K: SocketKind>: Send + Sync {
    /// Open a connection and start the handshake. Everything the transport
    /// hears afterwards goes into `sink`.
    async fn open(
        &self,
        config: &K::Config,
        credentials: &Credentials,
        sink: TransportSink<K>,
    ) -> Result<Arc<dyn Transport>, SocketError>;
}

/// Callback surface handed to a transport.
///
/// Tagged with the generation of the open that created it; once the socket
/// moves on to a newer transport, signals sent here are dropped.
pub struct TransportSink<K: SocketKind> {
    generation: u64,
    tx: mpsc::UnboundedSender<Command<K>>,
}

impl<K: SocketKind> Clone for TransportSink<K> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            tx: self.tx.clone(),
        }
    }
}

impl<K: SocketKind> TransportSink<K> {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Command<K>>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the socket is gone.
    pub fn emit(&self, signal: TransportSignal<K>) -> bool {
        self.tx
            .send(Command::Transport {
                generation: self.generation,
                signal,
            })
            .is_ok()
    }

    pub fn ack(&self, ack: K::Ack) -> bool {
        self.emit(TransportSignal::Ack(ack))
    }

    pub fn health_check(&self) -> bool {
        self.emit(TransportSignal::HealthCheck)
    }

    pub fn message(&self, payload: Vec<u8>) -> bool {
        self.emit(TransportSignal::Message(payload))
    }

    pub fn server_error(&self, error: SocketError, hint: K::Hint) -> bool {
        self.emit(TransportSignal::ServerError { error, hint })
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportSignal::Closed {
            code,
            reason: reason.into(),
        })
    }

    pub fn failure(&self, error: SocketError) -> bool {
        self.emit(TransportSignal::Failure(error))
    }
}
