//! The exchanger: one interface over the read and write primitives.
//!
//! Every control-packet type has exactly one field schedule, written in
//! [`crate::codec`] against this trait. Driving the schedule with a
//! [`WriteCursor`] serializes the message; driving it with a
//! [`ReadCursor`] parses one. Keeping a single schedule per type is what
//! rules out encoder/decoder drift.

use crate::{
	codec::DecodeError,
	cursor::{ReadCursor, WriteCursor},
	message::Text,
};
use std::convert::Infallible;

/// Which way field values move between a message and a packet buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
	Encode,
	Decode,
}

/// One method per wire primitive.
///
/// Encoders read from the `&mut` field and write the buffer; decoders
/// read the buffer and store into the field. The write direction cannot
/// fail (overshooting the buffer is detected afterwards from the cursor
/// position), so its error type is [`Infallible`].
pub trait Exchange<'a> {
	type Error;

	const DIRECTION: Direction;

	fn byte(&mut self, value: &mut u8) -> Result<(), Self::Error>;
	fn word(&mut self, value: &mut u16) -> Result<(), Self::Error>;
	fn length(&mut self, value: &mut usize) -> Result<(), Self::Error>;
	fn text(&mut self, value: &mut Text<'a>) -> Result<(), Self::Error>;
	fn remainder(&mut self, value: &mut Text<'a>) -> Result<(), Self::Error>;

	/// True when the current packet has no more bytes to offer. Only ever
	/// true while decoding; an encoder is bounded by the message instead.
	fn at_end(&self) -> bool {
		false
	}
}

impl<'a, 'd> Exchange<'a> for WriteCursor<'d> {
	type Error = Infallible;

	const DIRECTION: Direction = Direction::Encode;

	fn byte(&mut self, value: &mut u8) -> Result<(), Infallible> {
		self.put_u8(*value);
		Ok(())
	}

	fn word(&mut self, value: &mut u16) -> Result<(), Infallible> {
		self.put_u16(*value);
		Ok(())
	}

	fn length(&mut self, value: &mut usize) -> Result<(), Infallible> {
		self.put_var(*value);
		Ok(())
	}

	fn text(&mut self, value: &mut Text<'a>) -> Result<(), Infallible> {
		// Whatever does not fit the 16-bit length prefix is cut off.
		let data = value.as_bytes();
		let len = data.len().min(u16::MAX as usize);
		self.put_u16(len as u16);
		self.put_slice(&data[..len]);
		Ok(())
	}

	fn remainder(&mut self, value: &mut Text<'a>) -> Result<(), Infallible> {
		self.put_slice(value.as_bytes());
		Ok(())
	}
}

impl<'a> Exchange<'a> for ReadCursor<'a> {
	type Error = DecodeError;

	const DIRECTION: Direction = Direction::Decode;

	fn byte(&mut self, value: &mut u8) -> Result<(), DecodeError> {
		*value = self.take_u8()?;
		Ok(())
	}

	fn word(&mut self, value: &mut u16) -> Result<(), DecodeError> {
		*value = self.take_u16()?;
		Ok(())
	}

	fn length(&mut self, value: &mut usize) -> Result<(), DecodeError> {
		*value = self.take_var()?;
		Ok(())
	}

	fn text(&mut self, value: &mut Text<'a>) -> Result<(), DecodeError> {
		let len = self.take_u16()? as usize;
		*value = Text::new(self.take_slice(len)?);
		Ok(())
	}

	fn remainder(&mut self, value: &mut Text<'a>) -> Result<(), DecodeError> {
		*value = Text::new(self.take_rest());
		Ok(())
	}

	fn at_end(&self) -> bool {
		self.remaining() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::Exchange;
	use crate::{
		cursor::{ReadCursor, WriteCursor},
		message::Text,
	};

	#[test]
	fn text_round_trips_without_copying() {
		let source = b"topic/one";
		let mut buf = [0u8; 16];

		let mut writer = WriteCursor::new(&mut buf);
		writer.text(&mut Text::new(source)).unwrap();
		let len = writer.position();
		assert_eq!(len, 2 + source.len());

		let mut reader = ReadCursor::new(&buf[..len]);
		let mut text = Text::default();
		reader.text(&mut text).unwrap();
		assert_eq!(text.as_bytes(), source);
		assert_eq!(text.as_bytes().as_ptr(), buf[2..].as_ptr());
	}

	#[test]
	fn oversized_text_is_cut_at_the_length_prefix() {
		let oversized = vec![0x61; u16::MAX as usize + 10];
		let mut writer = WriteCursor::measuring();
		writer.text(&mut Text::new(&oversized)).unwrap();
		assert_eq!(writer.position(), 2 + u16::MAX as usize);
	}
}
