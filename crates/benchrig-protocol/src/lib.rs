//! Protocol handlers for benchrig.
//!
//! A workflow never touches the wire directly: it asks the
//! [`HandlerRegistry`] for a [`ProtocolHandler`] by tag, the handler opens
//! a [`Session`] over a [`WireTransport`], and commands flow through
//! [`ProtocolHandler::execute_sequence`]. RS-232 is the reference handler;
//! the transport seam keeps it testable without hardware.

mod handler;
mod registry;
mod rs232;
mod serial;
mod transport;
mod validate;

pub use handler::{HandlerStats, ProtocolHandler, Session};
pub use registry::{HandlerFactory, HandlerRegistry};
pub use rs232::Rs232Handler;
pub use serial::SerialWireTransport;
pub use transport::{wire_settings_for, Parity, WireSettings, WireTransport};
pub use validate::{validate_response, ValidationMethod, ValidationOutcome};
