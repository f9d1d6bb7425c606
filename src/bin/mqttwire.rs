use clap::{Parser, Subcommand, ValueEnum};
use mqtt_wire::{
	client::{Client, Credentials, Options},
	QoS,
};
use std::{io::stdin, process, str::from_utf8};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> mqtt_wire::Result<()> {
	setup_tracing()?;

	let arguments = Arguments::parse();
	let options = Options::from(&arguments);
	let Arguments { command, qos, .. } = arguments;

	let mut client = Client::connect(options).await?;

	match command {
		Commands::Sub { topics } => {
			let filters: Vec<(&str, QoS)> =
				topics.iter().map(|topic| (topic.as_str(), qos.into())).collect();
			client.subscribe(&filters).await?;

			loop {
				tokio::select! {
					publication = client.poll() => {
						let publication = publication?;
						println!(
							"{}: {}",
							publication.topic,
							from_utf8(&publication.payload).unwrap_or_default()
						);
					}
					_ = tokio::signal::ctrl_c() => break,
				}
			}
			client.disconnect().await?;
		}
		Commands::Pub { topic, payload, count } => {
			match payload {
				Some(payload) => {
					// The payload was supplied as an argument. Publish it
					// `count` times.
					for _ in 0..count.unwrap_or(1) {
						client
							.publish(&topic, payload.as_bytes(), qos.into(), false)
							.await?;
					}
				}
				None => {
					// No payload on the command line: publish lines from
					// stdin, up to `count` if given or until end-of-stream.
					for (n, line) in stdin().lines().enumerate() {
						if let Some(max) = count {
							if n == max {
								break;
							}
						}
						let line = line?;
						client
							.publish(&topic, line.as_bytes(), qos.into(), false)
							.await?;
					}
				}
			}
			client.disconnect().await?;
		}
	}

	Ok(())
}

fn setup_tracing() -> Result<(), SetGlobalDefaultError> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::ERROR.into())
		.with_env_var("MQTT_LOG")
		.try_from_env();

	let subscriber = tracing_subscriber::fmt()
		.with_file(true)
		.with_target(false)
		.with_env_filter(filter.unwrap_or_default())
		.finish();

	tracing::subscriber::set_global_default(subscriber)
}

impl From<&Arguments> for Options {
	fn from(value: &Arguments) -> Self {
		Options {
			host: value.host.clone(),
			port: value.port,
			keep_alive: value.keep_alive,
			clean_session: !value.disable_clean_session,
			client_id: value
				.id
				.clone()
				.unwrap_or_else(|| build_client_id(!value.disable_clean_session)),
			credentials: value.user.clone().map(|username| Credentials {
				username,
				password: value.password.clone().unwrap_or_default().into_bytes(),
			}),
			will: None,
		}
	}
}

fn build_client_id(clean_session: bool) -> String {
	if !clean_session {
		format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
	} else {
		format!(
			"{}/{}:{}",
			env!("CARGO_PKG_NAME"),
			env!("CARGO_PKG_VERSION"),
			process::id()
		)
	}
}

#[derive(Debug, Parser)]
struct Arguments {
	#[command(subcommand)]
	command: Commands,

	/// MQTT broker to connect to.
	#[arg(
		long,
		short = 'H',
		global = true,
		default_value = "localhost",
		env = "MQTT_HOST"
	)]
	host: String,

	#[arg(long, short, global = true, default_value = "1883", env = "MQTT_PORT")]
	port: u16,

	/// ID to use for this client.
	#[arg(long, short = 'i', global = true, env = "MQTT_ID")]
	id: Option<String>,

	/// Keep-alive timeout, in seconds.
	#[arg(long, short = 'k', global = true, default_value = "60")]
	keep_alive: u16,

	/// Disable clean session to ask the broker for a persistent session.
	#[arg(long, short = 'c', global = true)]
	disable_clean_session: bool,

	/// Username to authenticate with.
	#[arg(long, short = 'u', global = true, env = "MQTT_USER")]
	user: Option<String>,

	/// Password to authenticate with.
	#[arg(long, global = true, env = "MQTT_PASSWORD")]
	password: Option<String>,

	#[arg(
		long,
		value_enum,
		global = true,
		default_value = "qos0",
		rename_all = "lower"
	)]
	qos: InputQoS,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Subscribe to topics and print publications.
	Sub {
		#[clap(default_value = "#")]
		topics: Vec<String>,
	},
	/// Publish a payload, or lines from stdin.
	Pub {
		topic: String,

		payload: Option<String>,

		#[arg(long, short = 'C')]
		count: Option<usize>,
	},
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputQoS {
	Qos0,
	Qos1,
	Qos2,
}

impl From<InputQoS> for QoS {
	fn from(value: InputQoS) -> Self {
		match value {
			InputQoS::Qos0 => QoS::AtMostOnce,
			InputQoS::Qos1 => QoS::AtLeastOnce,
			InputQoS::Qos2 => QoS::ExactlyOnce,
		}
	}
}
