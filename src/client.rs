//! A small asynchronous MQTT client on top of the codec.
//!
//! One connection, no background task: the caller drives [`Client::poll`]
//! and the client handles framing, acknowledgements and keep-alive pings
//! internally. The only state retained between calls is the packet-id
//! counter and the receive buffer; QoS 1/2 redelivery and session
//! resumption are left to the peer.

use crate::{
	message::{Body, Message, PacketType},
	DecodeError, Overflow, QoS,
};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	net::TcpStream,
	time::timeout,
};

const INITIAL_BUFFER: usize = 4 * 1024;

/// Connection options for [`Client::connect`].
#[derive(Clone, Debug)]
pub struct Options {
	pub host: String,
	pub port: u16,
	pub client_id: String,
	/// Keep-alive interval in seconds; zero disables pings.
	pub keep_alive: u16,
	pub clean_session: bool,
	pub credentials: Option<Credentials>,
	pub will: Option<Will>,
}

impl Default for Options {
	fn default() -> Self {
		Self {
			host: String::from("localhost"),
			port: 1883,
			client_id: String::new(),
			keep_alive: 60,
			clean_session: true,
			credentials: None,
			will: None,
		}
	}
}

/// Username and password for the CONNECT handshake. The password is raw
/// bytes; brokers may issue binary passwords.
#[derive(Clone, Debug)]
pub struct Credentials {
	pub username: String,
	pub password: Vec<u8>,
}

/// Message the broker publishes on the client's behalf if the connection
/// drops without a DISCONNECT.
#[derive(Clone, Debug)]
pub struct Will {
	pub topic: String,
	pub payload: Vec<u8>,
	pub qos: QoS,
	pub retain: bool,
}

/// An inbound PUBLISH, detached from the receive buffer.
#[derive(Clone, Debug)]
pub struct Publication {
	pub topic: String,
	pub payload: Bytes,
	pub qos: QoS,
	pub retain: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("connection closed by broker")]
	ConnectionClosed,
	#[error("connection refused by broker: return code {0}")]
	ConnectionRefused(u8),
	#[error("expected CONNACK, received a different packet")]
	UnexpectedPacket,
}

/// An MQTT client over any async byte stream (TCP in practice; anything
/// [`AsyncRead`] + [`AsyncWrite`] in tests).
pub struct Client<S = TcpStream> {
	stream: S,
	buffer: BytesMut,
	scratch: Vec<u8>,
	packet_id: u16,
	keep_alive: Option<Duration>,
}

impl Client<TcpStream> {
	/// Opens a TCP connection to the broker and completes the MQTT
	/// handshake.
	///
	/// ```no_run
	/// # async fn example() -> mqtt_wire::Result<()> {
	/// use mqtt_wire::client::{Client, Options};
	/// use mqtt_wire::QoS;
	///
	/// let options = Options { client_id: String::from("sensor-7"), ..Options::default() };
	/// let mut client = Client::connect(options).await?;
	/// client.subscribe(&[("commands/sensor-7", QoS::AtLeastOnce)]).await?;
	/// loop {
	/// 	let publication = client.poll().await?;
	/// 	println!("{}: {} bytes", publication.topic, publication.payload.len());
	/// }
	/// # }
	/// ```
	pub async fn connect(options: Options) -> crate::Result<Self> {
		let stream = TcpStream::connect((options.host.as_str(), options.port)).await?;
		tracing::debug!(host = %options.host, port = options.port, "connected");
		Self::handshake(stream, options).await
	}
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
	/// Completes the MQTT handshake over an already-connected stream:
	/// sends CONNECT and waits for the broker's CONNACK.
	pub async fn handshake(stream: S, options: Options) -> crate::Result<Self> {
		let mut client = Self {
			stream,
			buffer: BytesMut::with_capacity(INITIAL_BUFFER),
			scratch: vec![0; INITIAL_BUFFER],
			packet_id: 1,
			keep_alive: (options.keep_alive > 0)
				.then(|| Duration::from_secs(options.keep_alive.into())),
		};

		let mut connect =
			Message::connect(&options.client_id, options.clean_session, options.keep_alive);
		if let Some(credentials) = &options.credentials {
			connect = connect.credentials(&credentials.username, &credentials.password);
		}
		if let Some(will) = &options.will {
			connect = connect.will(&will.topic, &will.payload, will.qos, will.retain);
		}
		client.send(connect).await?;

		let frame = client.read_frame().await?;
		let message = Message::decode(&frame)?;
		match message.body {
			Body::ConnAck(connack) if connack.accepted() => {
				tracing::debug!(session_present = connack.session_present(), "session accepted");
				Ok(client)
			}
			Body::ConnAck(connack) => Err(ClientError::ConnectionRefused(connack.return_code).into()),
			_ => Err(ClientError::UnexpectedPacket.into()),
		}
	}

	/// Publishes `payload` to `topic`. For QoS above [`QoS::AtMostOnce`] a
	/// packet id is assigned; the broker's acknowledgement is consumed by
	/// the [`poll`] loop.
	///
	/// [`poll`]: Client::poll
	pub async fn publish(
		&mut self,
		topic: &str,
		payload: &[u8],
		qos: QoS,
		retain: bool,
	) -> crate::Result<()> {
		let counter = match qos {
			QoS::AtMostOnce => None,
			_ => Some(&mut self.packet_id),
		};
		let message = Message::publish(topic, payload, qos, retain, counter);
		self.send(message).await
	}

	/// Subscribes to the given topic filters.
	pub async fn subscribe(&mut self, topics: &[(&str, QoS)]) -> crate::Result<()> {
		let message = Message::subscribe(&mut self.packet_id, topics);
		self.send(message).await
	}

	/// Drops the given subscriptions.
	pub async fn unsubscribe(&mut self, topics: &[&str]) -> crate::Result<()> {
		let message = Message::unsubscribe(&mut self.packet_id, topics);
		self.send(message).await
	}

	/// Waits for the next inbound PUBLISH. Other control packets are
	/// handled internally; publishes above QoS 0 are acknowledged with
	/// PUBACK before being returned.
	pub async fn poll(&mut self) -> crate::Result<Publication> {
		loop {
			let frame = self.read_frame().await?;
			let message = Message::decode(&frame)?;

			match &message.body {
				Body::Publish(publish) => {
					let qos: QoS = message.header.publish_qos().try_into()?;
					let publication = Publication {
						topic: String::from_utf8_lossy(publish.topic.as_bytes()).into_owned(),
						payload: frame.slice_ref(publish.payload.as_bytes()),
						qos,
						retain: message.header.publish_retain(),
					};
					if qos > QoS::AtMostOnce {
						let id = publish.packet_id.unwrap_or_default();
						self.send(Message::ack(PacketType::PubAck, id)).await?;
					}
					return Ok(publication);
				}
				Body::SubAck(suback) => {
					tracing::debug!(
						id = suback.packet_id,
						codes = ?suback.return_codes,
						"subscription acknowledged"
					);
				}
				Body::UnsubAck(ack) => {
					tracing::debug!(id = ack.packet_id, "unsubscription acknowledged");
				}
				Body::PingResp => tracing::trace!("pong"),
				other => tracing::debug!(?other, "ignoring packet"),
			}
		}
	}

	/// Sends DISCONNECT and shuts the stream down.
	pub async fn disconnect(mut self) -> crate::Result<()> {
		self.send(Message::disconnect()).await?;
		self.stream.shutdown().await?;
		Ok(())
	}

	async fn send(&mut self, mut message: Message<'_>) -> crate::Result<()> {
		let len = loop {
			match message.encode(&mut self.scratch) {
				Ok(len) => break len,
				Err(Overflow { required }) => self.scratch.resize(required, 0),
			}
		};
		tracing::trace!(len, control = message.header.control, "sending packet");
		self.stream.write_all(&self.scratch[..len]).await?;
		Ok(())
	}

	/// Reads until a complete message is buffered, then splits it off.
	async fn read_frame(&mut self) -> crate::Result<Bytes> {
		loop {
			match Message::peek(&self.buffer) {
				Ok(total) if total <= self.buffer.len() => {
					return Ok(self.buffer.split_to(total).freeze());
				}
				Ok(_) | Err(DecodeError::Incomplete) => {}
				Err(error) => return Err(error.into()),
			}

			if self.read_more().await? == 0 {
				return Err(ClientError::ConnectionClosed.into());
			}
		}
	}

	/// One read into the buffer. With keep-alive enabled, a quiet
	/// interval triggers a PINGREQ instead of waiting forever.
	async fn read_more(&mut self) -> crate::Result<usize> {
		let Some(interval) = self.keep_alive else {
			return Ok(self.stream.read_buf(&mut self.buffer).await?);
		};

		loop {
			match timeout(interval, self.stream.read_buf(&mut self.buffer)).await {
				Ok(read) => return Ok(read?),
				Err(_elapsed) => {
					tracing::trace!("keep-alive interval elapsed, pinging");
					self.send(Message::ping_req()).await?;
				}
			}
		}
	}
}
