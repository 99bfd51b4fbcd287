//! Core trait definitions

mod transport;

pub use transport::{
    BoxedStream, HandshakeAcceptor, StreamAcceptor, StreamHandshake, Transport,
    TransportConnector,
};
