pub mod backoff;
pub mod client;
pub mod messages;
pub mod socket;

pub use backoff::{ConnectionAttempt, ReconnectPolicy};
pub use client::{ConnectionState, Transport, TransportEvent, TransportOptions, TransportSender};
pub use messages::{InboundFrame, InboundMessage, OutboundMessage};
pub use socket::{Connector, WsConnector, WsSink, WsStream};
