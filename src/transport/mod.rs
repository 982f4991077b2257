//! Bidirectional frame transport
//!
//! The session talks to the remote service through two seams: a
//! [`Connector`] that opens connections and a [`Transport`] for the open
//! connection's outbound half. Everything inbound is reported as a
//! [`TransportEvent`] through the sink handed to `connect`.

pub mod websocket;

use std::sync::Arc;

use crate::error::TransportError;

pub use websocket::WsConnector;

/// Raw inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Connection lifecycle and inbound traffic
pub enum TransportEvent {
    /// Connection is up; outbound frames go through this handle
    Opened(Box<dyn Transport>),
    Frame(InboundFrame),
    /// Connection could not be opened or broke mid-session
    Failed(TransportError),
    /// Remote closed cleanly
    Closed,
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::Opened(_) => write!(f, "Opened"),
            TransportEvent::Frame(frame) => f.debug_tuple("Frame").field(frame).finish(),
            TransportEvent::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            TransportEvent::Closed => write!(f, "Closed"),
        }
    }
}

/// Receives every event of one connection, in order
pub type TransportSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Outbound half of an open connection
pub trait Transport: Send {
    /// Queue a text frame; frames go out in call order
    fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection; no events are required afterwards
    fn close(&mut self);
}

/// Opens connections to the remote service
pub trait Connector: Send {
    /// Begin opening a connection; the outcome arrives on `events`
    fn connect(&mut self, events: TransportSink);
}
