//! # mqtt-wire
//!
//! An MQTT v3.1.1 control-packet codec: builders for every outbound
//! packet type, a bounds-safe two-pass encoder, and a zero-copy decoder,
//! with an optional tokio client on top (feature `client`).
//!
//! Encoding measures the body against a zero-capacity cursor before
//! writing, so the variable-width remaining length lands in the header
//! without shifting any buffered bytes. Decoded text fields borrow from
//! the input buffer; nothing is copied until a caller decides to keep it.
//!
//! ```
//! use mqtt_wire::{Message, QoS};
//!
//! let mut counter = 1;
//! let mut message = Message::subscribe(&mut counter, &[("sensors/#", QoS::AtLeastOnce)]);
//!
//! let mut buffer = [0u8; 64];
//! let len = message.encode(&mut buffer)?;
//!
//! let decoded = Message::decode(&buffer[..len])?;
//! assert_eq!(decoded, message);
//! # Ok::<(), mqtt_wire::Error>(())
//! ```

mod codec;
mod cursor;
mod exchange;
mod message;
mod qos;

#[cfg(feature = "client")]
pub mod client;

pub use self::{
	codec::{DecodeError, Overflow},
	message::{
		connect_flags, Ack, Body, ConnAck, Connect, FixedHeader, Message, PacketType, Publish,
		SubAck, Subscribe, Text, Unsubscribe,
	},
	qos::{InvalidQoS, QoS},
};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
