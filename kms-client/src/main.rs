use std::path::PathBuf;

use anyhow::Context;
use kms_client::{BrokerClient, Card, KmsClientError};
use kms_protocol::{DEFAULT_SOCKET_PATH, Geometry, PREFERRED_MODE};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(clap::Subcommand, Clone, Debug)]
enum CliCommand {
	/// Show a solid colour on a CRTC driving a connector
	Output {
		#[arg(long)]
		connector: u32,
		#[arg(long)]
		crtc: u32,
		#[arg(long, default_value = PREFERRED_MODE)]
		mode: String,
	},
	/// Show a solid colour rectangle on a plane
	Overlay {
		#[arg(long)]
		crtc: u32,
		#[arg(long)]
		plane: u32,
		#[arg(long, default_value_t = 0)]
		x: i32,
		#[arg(long, default_value_t = 0)]
		y: i32,
		#[arg(long)]
		width: u32,
		#[arg(long)]
		height: u32,
	},
}

#[derive(clap::Parser, Debug)]
#[command(about = "Drives an output or overlay through the kmsd broker")]
struct Cli {
	/// DRM card node
	#[arg(long, global = true, default_value = "/dev/dri/card0")]
	device: PathBuf,
	/// Broker socket
	#[arg(long, global = true, default_value = DEFAULT_SOCKET_PATH)]
	socket: PathBuf,
	/// Fill colour as RRGGBB hex
	#[arg(long, global = true, default_value = "3366ff", value_parser = parse_color)]
	color: u32,
	#[command(subcommand)]
	command: CliCommand,
}

fn parse_color(raw: &str) -> Result<u32, String> {
	let hex = raw.trim_start_matches('#').trim_start_matches("0x");
	let rgb = u32::from_str_radix(hex, 16).map_err(|e| format!("invalid colour {raw:?}: {e}"))?;
	if rgb > 0xff_ffff {
		return Err(format!("colour {raw:?} has more than 24 bits"));
	}
	Ok(rgb)
}

fn wait_for_enter() -> std::io::Result<()> {
	println!("press Enter to release");
	std::io::stdin().read_line(&mut String::new())?;
	Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
	let card = Card::open(&cli.device)
		.with_context(|| format!("failed to open {}", cli.device.display()))?;
	card.drop_master();
	let magic = card.magic()?;

	let mut client = BrokerClient::connect(&cli.socket)
		.with_context(|| format!("failed to connect to {}", cli.socket.display()))?;
	client.authenticate(magic)?;
	info!(magic, "authenticated with broker");

	match cli.command {
		CliCommand::Output {
			connector,
			crtc,
			mode,
		} => {
			let found = card.find_mode(connector, &mode)?;
			let (width, height) = found.size();
			let framebuffer = card.solid_framebuffer((width.into(), height.into()), cli.color)?;
			let result = client
				.acquire_output(crtc, connector, framebuffer.id(), &mode)
				.and_then(|()| {
					info!(crtc, connector, ?found, "output acquired");
					wait_for_enter()?;
					client.release_output()
				});
			framebuffer.destroy(&card);
			result?;
		}
		CliCommand::Overlay {
			crtc,
			plane,
			x,
			y,
			width,
			height,
		} => {
			let framebuffer = card.solid_framebuffer((width, height), cli.color)?;
			let geometry = Geometry {
				x,
				y,
				width,
				height,
			};
			let result = client
				.acquire_overlay(crtc, plane, framebuffer.id(), geometry)
				.and_then(|()| {
					info!(crtc, plane, %geometry, "overlay acquired");
					wait_for_enter()?;
					client.release_overlay()
				});
			framebuffer.destroy(&card);
			result?;
		}
	}
	info!("released, exiting");
	Ok(())
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();
	let cli = <Cli as clap::Parser>::parse();
	if let Err(err) = run(cli) {
		if let Some(KmsClientError::Rejected { .. }) = err.downcast_ref::<KmsClientError>() {
			error!("broker refused: {err:#}");
		} else {
			error!("kms-client failed: {err:#}");
		}
		std::process::exit(1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn colours_parse_with_or_without_prefix() {
		assert_eq!(parse_color("ff0000"), Ok(0xff0000));
		assert_eq!(parse_color("#00ff00"), Ok(0x00ff00));
		assert_eq!(parse_color("0x0000ff"), Ok(0x0000ff));
		assert!(parse_color("1ff0000").is_err());
		assert!(parse_color("blue").is_err());
	}
}
