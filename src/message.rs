//! The in-memory model of MQTT v3.1.1 control packets, and the builders
//! that produce well-formed outbound messages.

use crate::qos::QoS;
use std::fmt;

pub(crate) const PROTOCOL_NAME: &str = "MQTT";
pub(crate) const PROTOCOL_LEVEL: u8 = 4;

/// CONNECT flag bits, as carried in [`Connect::flags`].
pub mod connect_flags {
	pub const CLEAN_SESSION: u8 = 0x02;
	/// Gates the will topic and will message in the payload.
	pub const WILL: u8 = 0x40;
	pub const WILL_RETAIN: u8 = 0x20;
	/// Gates the username and password in the payload.
	pub const CREDENTIALS: u8 = 0x80;
}

/// A length-prefixed string on the wire.
///
/// `Text` borrows its bytes: from caller-supplied data when building a
/// message, or from the receive buffer when one is decoded. The codec
/// never copies text, so decoded values must not outlive the buffer they
/// were parsed from; the lifetime parameter enforces exactly that.
///
/// Bytes pass through unvalidated; MQTT calls these fields strings but
/// brokers and clients routinely stuff binary into them (passwords,
/// publish payloads). Use [`as_str`] when UTF-8 actually matters.
///
/// [`as_str`]: Text::as_str
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Text<'a>(&'a [u8]);

impl<'a> Text<'a> {
	pub const fn new(data: &'a [u8]) -> Self {
		Self(data)
	}

	#[inline]
	pub const fn as_bytes(&self) -> &'a [u8] {
		self.0
	}

	#[inline]
	pub const fn len(&self) -> usize {
		self.0.len()
	}

	#[inline]
	pub const fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_str(&self) -> Result<&'a str, std::str::Utf8Error> {
		std::str::from_utf8(self.0)
	}
}

impl<'a> From<&'a str> for Text<'a> {
	#[inline]
	fn from(value: &'a str) -> Self {
		Self(value.as_bytes())
	}
}

impl<'a> From<&'a [u8]> for Text<'a> {
	#[inline]
	fn from(value: &'a [u8]) -> Self {
		Self(value)
	}
}

impl fmt::Debug for Text<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", String::from_utf8_lossy(self.0))
	}
}

impl fmt::Display for Text<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", String::from_utf8_lossy(self.0))
	}
}

/// Control-packet type, the high nibble of the control byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
	Connect = 1,
	ConnAck,
	Publish,
	PubAck,
	PubRec,
	PubRel,
	PubComp,
	Subscribe,
	SubAck,
	Unsubscribe,
	UnsubAck,
	PingReq,
	PingResp,
	Disconnect,
}

impl PacketType {
	pub fn from_control(control: u8) -> Option<Self> {
		Some(match control >> 4 {
			1 => Self::Connect,
			2 => Self::ConnAck,
			3 => Self::Publish,
			4 => Self::PubAck,
			5 => Self::PubRec,
			6 => Self::PubRel,
			7 => Self::PubComp,
			8 => Self::Subscribe,
			9 => Self::SubAck,
			10 => Self::Unsubscribe,
			11 => Self::UnsubAck,
			12 => Self::PingReq,
			13 => Self::PingResp,
			14 => Self::Disconnect,
			_ => return None,
		})
	}

	/// The control byte for this type with all flag bits clear.
	#[inline]
	pub const fn control(self) -> u8 {
		(self as u8) << 4
	}
}

/// The fixed header every control packet starts with.
///
/// `remaining_length` counts the bytes after the fixed header. It is
/// filled in by [`Message::encode`] once the body has been measured; on
/// decode it bounds how much of the buffer belongs to this message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
	pub control: u8,
	pub remaining_length: usize,
}

impl FixedHeader {
	#[inline]
	pub fn packet_type(&self) -> Option<PacketType> {
		PacketType::from_control(self.control)
	}

	/// QoS bits of a PUBLISH control byte.
	#[inline]
	pub fn publish_qos(&self) -> u8 {
		(self.control >> 1) & 0x03
	}

	#[inline]
	pub fn publish_retain(&self) -> bool {
		self.control & 0x01 != 0
	}

	#[inline]
	pub fn publish_duplicate(&self) -> bool {
		self.control & 0x08 != 0
	}
}

/// CONNECT variable header and payload.
///
/// The optional payload fields are gated by bits of `flags`:
/// [`connect_flags::WILL`] for the will pair, [`connect_flags::CREDENTIALS`]
/// for username and password. A gated field left `None` at encode time
/// goes out as a zero-length string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Connect<'a> {
	pub protocol_name: Text<'a>,
	pub protocol_level: u8,
	pub flags: u8,
	pub keep_alive: u16,
	pub client_id: Text<'a>,
	pub will_topic: Option<Text<'a>>,
	pub will_message: Option<Text<'a>>,
	pub username: Option<Text<'a>>,
	pub password: Option<Text<'a>>,
}

/// CONNACK variable header: two raw bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnAck {
	pub flags: u8,
	pub return_code: u8,
}

impl ConnAck {
	/// Whether the broker resumed an existing session.
	#[inline]
	pub fn session_present(&self) -> bool {
		self.flags & 0x01 != 0
	}

	#[inline]
	pub fn accepted(&self) -> bool {
		self.return_code == 0
	}
}

/// PUBLISH variable header and payload. QoS, retain and duplicate live in
/// the control byte (see the [`FixedHeader`] accessors); the packet id is
/// present on the wire only when the QoS bits are non-zero.
///
/// The payload has no length prefix; it runs to the end of the message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Publish<'a> {
	pub topic: Text<'a>,
	pub packet_id: Option<u16>,
	pub payload: Text<'a>,
}

/// SUBSCRIBE: a packet id and (topic filter, requested QoS) pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscribe<'a> {
	pub packet_id: u16,
	pub topics: Vec<(Text<'a>, u8)>,
}

/// SUBACK: a packet id and one return code per requested filter
/// (`0x00`–`0x02` for the granted QoS, `0x80` for failure).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubAck {
	pub packet_id: u16,
	pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE: a packet id and the topic filters to drop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Unsubscribe<'a> {
	pub packet_id: u16,
	pub topics: Vec<Text<'a>>,
}

/// The packet-id-only variable header shared by the acknowledgement
/// family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ack {
	pub packet_id: u16,
}

/// Variable header and payload, keyed by the packet type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body<'a> {
	Connect(Connect<'a>),
	ConnAck(ConnAck),
	Publish(Publish<'a>),
	PubAck(Ack),
	PubRec(Ack),
	PubRel(Ack),
	PubComp(Ack),
	Subscribe(Subscribe<'a>),
	SubAck(SubAck),
	Unsubscribe(Unsubscribe<'a>),
	UnsubAck(Ack),
	PingReq,
	PingResp,
	Disconnect,
	/// A control nibble this codec has no layout for. The body bytes are
	/// skipped; rejecting the packet is up to the caller.
	Unknown,
}

impl<'a> Body<'a> {
	/// An empty body of the variant matching the control byte, ready to
	/// be filled by a decode traversal.
	pub(crate) fn for_control(control: u8) -> Self {
		match PacketType::from_control(control) {
			Some(PacketType::Connect) => Self::Connect(Connect::default()),
			Some(PacketType::ConnAck) => Self::ConnAck(ConnAck::default()),
			Some(PacketType::Publish) => Self::Publish(Publish::default()),
			Some(PacketType::PubAck) => Self::PubAck(Ack::default()),
			Some(PacketType::PubRec) => Self::PubRec(Ack::default()),
			Some(PacketType::PubRel) => Self::PubRel(Ack::default()),
			Some(PacketType::PubComp) => Self::PubComp(Ack::default()),
			Some(PacketType::Subscribe) => Self::Subscribe(Subscribe::default()),
			Some(PacketType::SubAck) => Self::SubAck(SubAck::default()),
			Some(PacketType::Unsubscribe) => Self::Unsubscribe(Unsubscribe::default()),
			Some(PacketType::UnsubAck) => Self::UnsubAck(Ack::default()),
			Some(PacketType::PingReq) => Self::PingReq,
			Some(PacketType::PingResp) => Self::PingResp,
			Some(PacketType::Disconnect) => Self::Disconnect,
			None => Self::Unknown,
		}
	}
}

/// One MQTT control packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<'a> {
	pub header: FixedHeader,
	pub body: Body<'a>,
}

/// Hands out the current id and advances the counter, skipping the
/// reserved id zero on wrap-around.
fn next_packet_id(counter: &mut u16) -> u16 {
	if *counter == 0 {
		*counter = 1;
	}
	let id = *counter;
	*counter = counter.wrapping_add(1);
	id
}

impl<'a> Message<'a> {
	fn with_body(control: u8, body: Body<'a>) -> Self {
		Self {
			header: FixedHeader { control, remaining_length: 0 },
			body,
		}
	}

	/// Builds a CONNECT message with protocol level 4 (MQTT v3.1.1).
	pub fn connect(client_id: &'a str, clean_session: bool, keep_alive: u16) -> Self {
		let mut flags = 0;
		if clean_session {
			flags |= connect_flags::CLEAN_SESSION;
		}
		Self::with_body(
			PacketType::Connect.control(),
			Body::Connect(Connect {
				protocol_name: Text::from(PROTOCOL_NAME),
				protocol_level: PROTOCOL_LEVEL,
				flags,
				keep_alive,
				client_id: Text::from(client_id),
				..Connect::default()
			}),
		)
	}

	/// Attaches a username and password to a CONNECT message. The
	/// password is raw bytes; brokers may issue binary passwords.
	///
	/// Has no effect on any other message type.
	pub fn credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
		if let Body::Connect(connect) = &mut self.body {
			connect.flags |= connect_flags::CREDENTIALS | connect_flags::WILL;
			connect.username = Some(Text::from(username));
			connect.password = Some(Text::new(password));
		} else {
			debug_assert!(false, "credentials on a non-CONNECT message");
		}
		self
	}

	/// Attaches a will to a CONNECT message: the broker publishes
	/// `payload` to `topic` on the client's behalf if the connection
	/// drops without a DISCONNECT.
	///
	/// Has no effect on any other message type.
	pub fn will(mut self, topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> Self {
		if let Body::Connect(connect) = &mut self.body {
			connect.flags |= connect_flags::WILL | (qos as u8) << 3;
			if retain {
				connect.flags |= connect_flags::WILL_RETAIN;
			}
			connect.will_topic = Some(Text::from(topic));
			connect.will_message = Some(Text::new(payload));
		} else {
			debug_assert!(false, "will on a non-CONNECT message");
		}
		self
	}

	/// Builds a PUBLISH message. For QoS above [`QoS::AtMostOnce`] pass a
	/// packet-id counter; the current id is taken and the counter
	/// advanced.
	pub fn publish(
		topic: &'a str,
		payload: &'a [u8],
		qos: QoS,
		retain: bool,
		packet_id: Option<&mut u16>,
	) -> Self {
		let mut control = PacketType::Publish.control() | (qos as u8) << 1;
		if retain {
			control |= 0x01;
		}
		Self::with_body(
			control,
			Body::Publish(Publish {
				topic: Text::from(topic),
				packet_id: packet_id.map(next_packet_id),
				payload: Text::new(payload),
			}),
		)
	}

	/// Builds one of the acknowledgement-shaped messages: PUBACK, PUBREC,
	/// PUBREL, PUBCOMP, UNSUBACK or SUBACK (the latter with no return
	/// codes).
	pub fn ack(kind: PacketType, packet_id: u16) -> Self {
		let ack = Ack { packet_id };
		let (control, body) = match kind {
			PacketType::PubAck => (kind.control(), Body::PubAck(ack)),
			PacketType::PubRec => (kind.control(), Body::PubRec(ack)),
			// PUBREL carries the same reserved flag bits as SUBSCRIBE.
			PacketType::PubRel => (kind.control() | 0x02, Body::PubRel(ack)),
			PacketType::PubComp => (kind.control(), Body::PubComp(ack)),
			PacketType::UnsubAck => (kind.control(), Body::UnsubAck(ack)),
			PacketType::SubAck => (
				kind.control(),
				Body::SubAck(SubAck { packet_id, return_codes: Vec::new() }),
			),
			_ => {
				debug_assert!(false, "{kind:?} is not an ack-like packet type");
				(kind.control(), Body::Unknown)
			}
		};
		Self::with_body(control, body)
	}

	/// Builds a SUBSCRIBE message. The id comes from `packet_id`, which
	/// is advanced; the fixed header carries the mandatory
	/// acknowledgement flags.
	pub fn subscribe(packet_id: &mut u16, topics: &[(&'a str, QoS)]) -> Self {
		Self::with_body(
			PacketType::Subscribe.control() | 0x02,
			Body::Subscribe(Subscribe {
				packet_id: next_packet_id(packet_id),
				topics: topics
					.iter()
					.map(|(topic, qos)| (Text::from(*topic), *qos as u8))
					.collect(),
			}),
		)
	}

	/// Builds an UNSUBSCRIBE message. See [`Message::subscribe`].
	pub fn unsubscribe(packet_id: &mut u16, topics: &[&'a str]) -> Self {
		Self::with_body(
			PacketType::Unsubscribe.control() | 0x02,
			Body::Unsubscribe(Unsubscribe {
				packet_id: next_packet_id(packet_id),
				topics: topics.iter().copied().map(Text::from).collect(),
			}),
		)
	}

	pub fn ping_req() -> Self {
		Self::with_body(PacketType::PingReq.control(), Body::PingReq)
	}

	pub fn disconnect() -> Self {
		Self::with_body(PacketType::Disconnect.control(), Body::Disconnect)
	}

	#[inline]
	pub fn packet_type(&self) -> Option<PacketType> {
		self.header.packet_type()
	}
}

#[cfg(test)]
mod tests {
	use super::{connect_flags, next_packet_id, Body, Message, PacketType};
	use crate::QoS;

	#[test]
	fn builders_set_the_control_byte() {
		let mut counter = 1;
		assert_eq!(Message::connect("id", true, 0).header.control, 0x10);
		assert_eq!(
			Message::publish("t", b"", QoS::AtLeastOnce, true, Some(&mut counter))
				.header
				.control,
			0x33
		);
		assert_eq!(Message::subscribe(&mut counter, &[]).header.control, 0x82);
		assert_eq!(Message::unsubscribe(&mut counter, &[]).header.control, 0xa2);
		assert_eq!(Message::ack(PacketType::PubAck, 1).header.control, 0x40);
		assert_eq!(Message::ack(PacketType::PubRel, 1).header.control, 0x62);
		assert_eq!(Message::ping_req().header.control, 0xc0);
		assert_eq!(Message::disconnect().header.control, 0xe0);
	}

	#[test]
	fn credentials_set_both_gate_bits() {
		let message = Message::connect("id", true, 0).credentials("user", b"pass");
		let Body::Connect(connect) = message.body else {
			panic!("expected a CONNECT body");
		};
		assert_eq!(connect.flags, 0xc2);
		assert_eq!(connect.username.unwrap().as_bytes(), b"user");
		assert_eq!(connect.password.unwrap().as_bytes(), b"pass");
		assert!(connect.will_topic.is_none());
	}

	#[test]
	fn will_folds_qos_and_retain_into_the_flags() {
		let message = Message::connect("id", false, 0).will("gone", b"bye", QoS::AtLeastOnce, true);
		let Body::Connect(connect) = message.body else {
			panic!("expected a CONNECT body");
		};
		assert_eq!(
			connect.flags,
			connect_flags::WILL | connect_flags::WILL_RETAIN | 0x08
		);
	}

	#[test]
	fn packet_ids_are_taken_from_the_counter() {
		let mut counter = 5;
		let message = Message::publish("t", b"", QoS::AtLeastOnce, false, Some(&mut counter));
		let Body::Publish(publish) = message.body else {
			panic!("expected a PUBLISH body");
		};
		assert_eq!(publish.packet_id, Some(5));
		assert_eq!(counter, 6);
	}

	#[test]
	fn packet_id_zero_is_skipped() {
		let mut counter = u16::MAX;
		assert_eq!(next_packet_id(&mut counter), u16::MAX);
		assert_eq!(next_packet_id(&mut counter), 1);
		assert_eq!(counter, 2);
	}

	#[test]
	fn control_nibbles_map_to_packet_types() {
		for control in [0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90, 0xa0, 0xb0, 0xc0, 0xd0, 0xe0] {
			assert!(PacketType::from_control(control).is_some(), "{control:#x}");
		}
		assert_eq!(PacketType::from_control(0x00), None);
		assert_eq!(PacketType::from_control(0xf0), None);
	}
}
