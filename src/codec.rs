//! Encode and decode, driven by one field schedule per packet type.
//!
//! The schedule lives in [`exchange_fields`] and is written once against
//! the [`Exchange`] trait. Encoding runs it twice: first through a
//! zero-capacity cursor to measure the body (the remaining length has to
//! be known before the body can be written, and its own width depends on
//! its value), then through the destination buffer. Decoding runs it once
//! over a cursor narrowed to the current message.

use crate::{
	cursor::{ReadCursor, WriteCursor},
	exchange::{Direction, Exchange},
	message::{connect_flags, Body, FixedHeader, Message, Text},
};

/// Errors surfaced while decoding or peeking at a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
	/// Fewer bytes are buffered than the message needs. Recoverable:
	/// read more input and try again.
	#[error("not enough bytes for a complete message")]
	Incomplete,
	/// The remaining-length field carried a continuation bit into its
	/// fourth byte.
	#[error("remaining length runs past four bytes")]
	MalformedLength,
}

/// The destination buffer was too small for the encoded message.
///
/// Nothing beyond the buffer's capacity has been touched; the caller can
/// retry with a buffer of at least `required` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("buffer too small: message encodes to {required} bytes")]
pub struct Overflow {
	/// Total wire size of the message, fixed header included.
	pub required: usize,
}

impl<'a> Message<'a> {
	/// Measures the body, fills in `remaining_length`, and writes the
	/// complete packet into `dst`. Returns the number of bytes written.
	pub fn encode(&mut self, dst: &mut [u8]) -> Result<usize, Overflow> {
		// First pass: nothing is stored, the final position is the body
		// length.
		let mut measure = WriteCursor::measuring();
		write_fields(self, &mut measure);
		self.header.remaining_length = measure.position();

		let mut cursor = WriteCursor::new(dst);
		cursor.put_u8(self.header.control);
		cursor.put_var(self.header.remaining_length);
		write_fields(self, &mut cursor);

		if cursor.overflowed() {
			Err(Overflow { required: cursor.position() })
		} else {
			Ok(cursor.position())
		}
	}

	/// Decodes one message from the front of `src`.
	///
	/// Text fields borrow from `src`; nothing is copied. Bytes past the
	/// declared remaining length are left untouched, so a buffer holding
	/// several messages can be decoded front to back with [`peek`]
	/// supplying the offsets.
	///
	/// [`peek`]: Message::peek
	pub fn decode(src: &'a [u8]) -> Result<Self, DecodeError> {
		let mut cursor = ReadCursor::new(src);
		let control = cursor.take_u8()?;
		let remaining_length = cursor.take_var()?;

		// Cap the readable range at the end of this message so that the
		// publish payload and the subscribe item loops cannot run into a
		// following message in the same buffer.
		cursor.narrow(remaining_length)?;

		let mut message = Message {
			header: FixedHeader { control, remaining_length },
			body: Body::for_control(control),
		};
		exchange_fields(&mut message, &mut cursor)?;
		Ok(message)
	}

	/// Reads only the fixed header and returns the total wire size of the
	/// message it announces, without consuming anything.
	///
	/// [`DecodeError::Incomplete`] means the fixed header itself is still
	/// truncated. A returned size larger than the buffered bytes means
	/// the body has not fully arrived yet; either way the caller keeps
	/// reading before calling [`Message::decode`].
	pub fn peek(src: &[u8]) -> Result<usize, DecodeError> {
		let mut cursor = ReadCursor::new(src);
		let _control = cursor.take_u8()?;
		let remaining_length = cursor.take_var()?;
		Ok(cursor.position() + remaining_length)
	}
}

/// The write direction cannot fail; unwrap it structurally.
fn write_fields<'a>(message: &mut Message<'a>, cursor: &mut WriteCursor<'_>) {
	match exchange_fields(message, cursor) {
		Ok(()) => {}
		Err(infallible) => match infallible {},
	}
}

/// Walks the fields of one message in wire order, moving each through the
/// exchanger. The fixed header is not part of the schedule; encode and
/// decode handle it around the traversal.
///
/// Conditional fields are gated by flag bits that are part of the message
/// itself: set by the builder before an encode, read earlier in the same
/// traversal during a decode.
fn exchange_fields<'a, E: Exchange<'a>>(
	message: &mut Message<'a>,
	exx: &mut E,
) -> Result<(), E::Error> {
	let Message { header, body } = message;
	match body {
		Body::Connect(connect) => {
			exx.text(&mut connect.protocol_name)?;
			exx.byte(&mut connect.protocol_level)?;
			exx.byte(&mut connect.flags)?;
			exx.word(&mut connect.keep_alive)?;
			exx.text(&mut connect.client_id)?;
			if connect.flags & connect_flags::WILL != 0 {
				exx.text(connect.will_topic.get_or_insert_with(Text::default))?;
				exx.text(connect.will_message.get_or_insert_with(Text::default))?;
			}
			if connect.flags & connect_flags::CREDENTIALS != 0 {
				exx.text(connect.username.get_or_insert_with(Text::default))?;
				exx.text(connect.password.get_or_insert_with(Text::default))?;
			}
		}
		Body::ConnAck(connack) => {
			exx.byte(&mut connack.flags)?;
			exx.byte(&mut connack.return_code)?;
		}
		Body::Publish(publish) => {
			exx.text(&mut publish.topic)?;
			if header.publish_qos() != 0 {
				exx.word(publish.packet_id.get_or_insert(0))?;
			}
			exx.remainder(&mut publish.payload)?;
		}
		Body::PubAck(ack)
		| Body::PubRec(ack)
		| Body::PubRel(ack)
		| Body::PubComp(ack)
		| Body::UnsubAck(ack) => {
			exx.word(&mut ack.packet_id)?;
		}
		Body::Subscribe(subscribe) => {
			exx.word(&mut subscribe.packet_id)?;
			exchange_list(&mut subscribe.topics, exx, |(topic, qos), exx| {
				exx.text(topic)?;
				exx.byte(qos)
			})?;
		}
		Body::SubAck(suback) => {
			exx.word(&mut suback.packet_id)?;
			exchange_list(&mut suback.return_codes, exx, |code, exx| exx.byte(code))?;
		}
		Body::Unsubscribe(unsubscribe) => {
			exx.word(&mut unsubscribe.packet_id)?;
			exchange_list(&mut unsubscribe.topics, exx, |topic, exx| exx.text(topic))?;
		}
		Body::PingReq | Body::PingResp | Body::Disconnect | Body::Unknown => {}
	}
	Ok(())
}

/// Drives the list payloads of SUBSCRIBE, UNSUBSCRIBE and SUBACK. An
/// encoder emits exactly the items present; a decoder grows the list
/// until the packet's narrowed end, so a short packet yields a short
/// list.
fn exchange_list<'a, T, E, F>(items: &mut Vec<T>, exx: &mut E, mut field: F) -> Result<(), E::Error>
where
	T: Default,
	E: Exchange<'a>,
	F: FnMut(&mut T, &mut E) -> Result<(), E::Error>,
{
	let mut count = 0;
	loop {
		if exx.at_end() {
			break;
		}
		if count == items.len() {
			match E::DIRECTION {
				Direction::Encode => break,
				Direction::Decode => items.push(T::default()),
			}
		}
		field(&mut items[count], exx)?;
		count += 1;
	}
	items.truncate(count);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::{DecodeError, Overflow};
	use crate::message::{Ack, Body, ConnAck, FixedHeader, Message, PacketType, SubAck, Text};
	use crate::QoS;

	fn encoded(message: &mut Message<'_>) -> Vec<u8> {
		let mut buf = vec![0u8; 512];
		let len = message.encode(&mut buf).unwrap();
		buf.truncate(len);
		buf
	}

	#[test]
	fn connect_wire_shape() {
		let mut message = Message::connect("test", true, 300);
		let bytes = encoded(&mut message);
		#[rustfmt::skip]
		assert_eq!(
			bytes,
			[
				0x10, 0x10,
				0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x01, 0x2c,
				0x00, 0x04, b't', b'e', b's', b't',
			]
		);
	}

	#[test]
	fn publish_wire_shape() {
		let mut message = Message::publish("abc", b"def", QoS::AtMostOnce, false, None);
		let bytes = encoded(&mut message);
		assert_eq!(
			bytes,
			[0x30, 0x08, 0x00, 0x03, b'a', b'b', b'c', b'd', b'e', b'f']
		);
	}

	#[test]
	fn credentials_go_out_behind_empty_will_slots() {
		let mut message = Message::connect("id", false, 0).credentials("u", b"pw");
		let bytes = encoded(&mut message);
		#[rustfmt::skip]
		assert_eq!(
			bytes,
			[
				0x10, 0x19,
				0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0xc0, 0x00, 0x00,
				0x00, 0x02, b'i', b'd',
				0x00, 0x00,             // will topic, gated in by 0x40
				0x00, 0x00,             // will message
				0x00, 0x01, b'u',
				0x00, 0x02, b'p', b'w',
			]
		);
	}

	#[test]
	fn connect_round_trips() {
		let mut message = Message::connect("client-1", true, 60)
			.will("status/client-1", b"offline", QoS::AtLeastOnce, true)
			.credentials("user", b"\x00\x01binary");
		let bytes = encoded(&mut message);
		assert_eq!(Message::decode(&bytes), Ok(message));
	}

	#[test]
	fn publish_round_trips_with_a_packet_id() {
		let mut counter = 41;
		let mut message =
			Message::publish("a/b", b"payload", QoS::ExactlyOnce, false, Some(&mut counter));
		let bytes = encoded(&mut message);

		let decoded = Message::decode(&bytes).unwrap();
		assert_eq!(decoded, message);
		let Body::Publish(publish) = decoded.body else {
			panic!("expected a PUBLISH body");
		};
		assert_eq!(publish.packet_id, Some(41));
		assert_eq!(counter, 42);
	}

	#[test]
	fn ack_family_round_trips() {
		for kind in [
			PacketType::PubAck,
			PacketType::PubRec,
			PacketType::PubRel,
			PacketType::PubComp,
			PacketType::UnsubAck,
		] {
			let mut message = Message::ack(kind, 7);
			let bytes = encoded(&mut message);
			assert_eq!(bytes.len(), 4, "{kind:?}");
			assert_eq!(Message::decode(&bytes), Ok(message), "{kind:?}");
		}
	}

	#[test]
	fn subscribe_round_trips() {
		let mut counter = 9;
		let mut message = Message::subscribe(
			&mut counter,
			&[("abc", QoS::AtLeastOnce), ("xyz", QoS::ExactlyOnce)],
		);
		let bytes = encoded(&mut message);

		let decoded = Message::decode(&bytes).unwrap();
		let Body::Subscribe(subscribe) = &decoded.body else {
			panic!("expected a SUBSCRIBE body");
		};
		assert_eq!(subscribe.packet_id, 9);
		assert_eq!(
			subscribe.topics,
			[(Text::from("abc"), 1), (Text::from("xyz"), 2)]
		);
		assert_eq!(decoded, message);
	}

	#[test]
	fn unsubscribe_round_trips() {
		let mut counter = 3;
		let mut message = Message::unsubscribe(&mut counter, &["abc", "d/e"]);
		let bytes = encoded(&mut message);
		assert_eq!(Message::decode(&bytes), Ok(message));
	}

	#[test]
	fn suback_round_trips_including_failure_codes() {
		let mut message = Message {
			header: FixedHeader { control: 0x90, remaining_length: 0 },
			body: Body::SubAck(SubAck { packet_id: 2, return_codes: vec![0x01, 0x80] }),
		};
		let bytes = encoded(&mut message);
		assert_eq!(bytes, [0x90, 0x04, 0x00, 0x02, 0x01, 0x80]);
		assert_eq!(Message::decode(&bytes), Ok(message));
	}

	#[test]
	fn connack_round_trips() {
		let mut message = Message {
			header: FixedHeader { control: 0x20, remaining_length: 0 },
			body: Body::ConnAck(ConnAck { flags: 0x01, return_code: 0x00 }),
		};
		let bytes = encoded(&mut message);
		assert_eq!(bytes, [0x20, 0x02, 0x01, 0x00]);

		let decoded = Message::decode(&bytes).unwrap();
		let Body::ConnAck(connack) = decoded.body else {
			panic!("expected a CONNACK body");
		};
		assert!(connack.session_present());
		assert!(connack.accepted());
	}

	#[test]
	fn empty_bodied_messages_round_trip() {
		for mut message in [Message::ping_req(), Message::disconnect()] {
			let bytes = encoded(&mut message);
			assert_eq!(bytes.len(), 2);
			assert_eq!(bytes[1], 0x00);
			assert_eq!(Message::decode(&bytes), Ok(message));
		}
		assert_eq!(
			Message::decode(&[0xd0, 0x00]).map(|m| m.body),
			Ok(Body::PingResp)
		);
	}

	#[test]
	fn zero_capacity_encode_reports_the_exact_size() {
		let mut message = Message::connect("test", true, 300);
		assert_eq!(message.encode(&mut []), Err(Overflow { required: 18 }));
		// The measurement also landed in the header.
		assert_eq!(message.header.remaining_length, 16);
	}

	#[test]
	fn overflowing_encode_never_writes_past_capacity() {
		let mut message = Message::publish("abc", b"def", QoS::AtMostOnce, false, None);
		let mut buf = [0xee; 16];
		assert_eq!(
			message.encode(&mut buf[..4]),
			Err(Overflow { required: 10 })
		);
		assert_eq!(buf[4..], [0xee; 12]);

		// A buffer of the reported size succeeds.
		assert_eq!(message.encode(&mut buf[..10]), Ok(10));
	}

	#[test]
	fn publish_payload_stops_at_the_message_boundary() {
		let mut buf = [0u8; 64];
		let mut first = Message::publish("abc", b"def", QoS::AtMostOnce, false, None);
		let first_len = first.encode(&mut buf).unwrap();
		let second_len = Message::ping_req().encode(&mut buf[first_len..]).unwrap();
		let buffered = &buf[..first_len + second_len];

		// Peek frames the first message; its payload must not bleed into
		// the ping that follows it in the same buffer.
		assert_eq!(Message::peek(buffered), Ok(first_len));
		let decoded = Message::decode(buffered).unwrap();
		let Body::Publish(publish) = decoded.body else {
			panic!("expected a PUBLISH body");
		};
		assert_eq!(publish.payload.as_bytes(), b"def");

		let rest = &buffered[first_len..];
		assert_eq!(Message::decode(rest).map(|m| m.body), Ok(Body::PingReq));
	}

	#[test]
	fn decoded_text_borrows_from_the_buffer() {
		let mut message = Message::publish("abc", b"def", QoS::AtMostOnce, false, None);
		let bytes = encoded(&mut message);
		let decoded = Message::decode(&bytes).unwrap();
		let Body::Publish(publish) = decoded.body else {
			panic!("expected a PUBLISH body");
		};
		assert_eq!(publish.topic.as_bytes().as_ptr(), bytes[4..].as_ptr());
	}

	#[test]
	fn subscribe_decode_keeps_only_the_items_present() {
		// Two filters requested, but the remaining length covers the
		// packet id and a single item.
		let bytes = [
			0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'b', b'c', 0x01, // item two, outside the message:
			0x00, 0x03, b'x', b'y', b'z', 0x02,
		];
		let decoded = Message::decode(&bytes).unwrap();
		let Body::Subscribe(subscribe) = decoded.body else {
			panic!("expected a SUBSCRIBE body");
		};
		assert_eq!(subscribe.topics.len(), 1);
		assert_eq!(subscribe.topics[0], (Text::from("abc"), 1));
	}

	#[test]
	fn truncated_list_item_is_incomplete() {
		// Remaining length stops in the middle of the first filter.
		let bytes = [0x82, 0x05, 0x00, 0x01, 0x00, 0x03, b'a'];
		assert_eq!(Message::decode(&bytes), Err(DecodeError::Incomplete));
	}

	#[test]
	fn unknown_packet_types_decode_to_an_empty_body() {
		let bytes = [0xf5, 0x02, 0xaa, 0xbb];
		let decoded = Message::decode(&bytes).unwrap();
		assert_eq!(decoded.header.control, 0xf5);
		assert_eq!(decoded.header.remaining_length, 2);
		assert_eq!(decoded.body, Body::Unknown);
	}

	#[test]
	fn peek_frames_a_complete_message() {
		let mut message = Message::connect("test", true, 300);
		let bytes = encoded(&mut message);
		assert_eq!(Message::peek(&bytes), Ok(bytes.len()));
	}

	#[test]
	fn peek_does_not_read_past_the_supplied_bytes() {
		assert_eq!(Message::peek(&[]), Err(DecodeError::Incomplete));
		assert_eq!(Message::peek(&[0x10]), Err(DecodeError::Incomplete));
		// Continuation bit set, next length byte missing.
		assert_eq!(Message::peek(&[0x10, 0x80]), Err(DecodeError::Incomplete));
		// Complete header announcing a 128-byte body: total size known
		// even though nothing past the header has arrived.
		assert_eq!(Message::peek(&[0x30, 0x80, 0x01]), Ok(3 + 128));
	}

	#[test]
	fn peek_is_idempotent_before_decode() {
		let mut message = Message::publish("t", b"x", QoS::AtMostOnce, false, None);
		let bytes = encoded(&mut message);
		assert_eq!(Message::peek(&bytes), Message::peek(&bytes));
		assert_eq!(Message::decode(&bytes), Ok(message));
	}

	#[test]
	fn decode_rejects_a_truncated_body() {
		let bytes = [0x30, 0x08, 0x00, 0x03, b'a'];
		assert_eq!(Message::decode(&bytes), Err(DecodeError::Incomplete));
	}

	#[test]
	fn decode_rejects_a_malformed_remaining_length() {
		let bytes = [0x30, 0x80, 0x80, 0x80, 0x80];
		assert_eq!(Message::decode(&bytes), Err(DecodeError::MalformedLength));
	}

	#[test]
	fn decode_reuses_nothing_across_messages() {
		// Same buffer, two acks back to back; ids stay with their frames.
		let mut buf = [0u8; 8];
		Message::ack(PacketType::PubAck, 1).encode(&mut buf[..4]).unwrap();
		Message::ack(PacketType::PubAck, 2).encode(&mut buf[4..]).unwrap();
		let first = Message::decode(&buf[..4]).unwrap();
		let second = Message::decode(&buf[4..]).unwrap();
		assert_eq!(first.body, Body::PubAck(Ack { packet_id: 1 }));
		assert_eq!(second.body, Body::PubAck(Ack { packet_id: 2 }));
	}
}
