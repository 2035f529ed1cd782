use std::{
	fs::{File, OpenOptions},
	os::fd::{AsFd, BorrowedFd},
	path::{Path, PathBuf},
};

use drm::{
	Device,
	control::{
		Device as ControlDevice, Mode, ModeTypeFlags, RawResourceHandle, connector, crtc,
		framebuffer, from_u32, plane,
	},
};
use kms_protocol::{Geometry, PREFERRED_MODE};

use super::{DisplayContext, DisplayError, OutputInfo};

/// An open DRM card node.
#[derive(Debug)]
pub struct Card(File);

impl AsFd for Card {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.0.as_fd()
	}
}

impl Device for Card {}

impl ControlDevice for Card {}

impl Card {
	pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
		let mut options = OpenOptions::new();
		options.read(true);
		options.write(true);
		Ok(Card(options.open(path)?))
	}
}

/// The CRTC state captured before a client took over an output.
#[derive(Debug, Clone)]
pub struct CrtcSnapshot {
	framebuffer: Option<framebuffer::Handle>,
	position: (u32, u32),
	mode: Option<Mode>,
	connectors: Vec<connector::Handle>,
}

/// [`DisplayContext`] backed by a DRM card on which this process is master.
#[derive(Debug)]
pub struct DrmDisplay {
	card: Card,
	path: PathBuf,
}

impl DrmDisplay {
	#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
	pub fn open(path: impl AsRef<Path>) -> Result<Self, DisplayError> {
		let card = Card::open(&path).map_err(DisplayError::io("open card"))?;
		if let Err(e) = card.acquire_master_lock() {
			tracing::warn!("could not become DRM master, client mode-sets will fail: {e}");
		}
		Ok(Self {
			card,
			path: path.as_ref().to_path_buf(),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Pairs every connector with the CRTC its active encoder feeds.
	fn connector_routes(&self) -> Result<Vec<(connector::Handle, Option<crtc::Handle>)>, DisplayError> {
		let resources = self
			.card
			.resource_handles()
			.map_err(DisplayError::io("get resources"))?;
		resources
			.connectors()
			.iter()
			.map(|&connector| {
				let info = self
					.card
					.get_connector(connector, false)
					.map_err(DisplayError::io("get connector"))?;
				let Some(encoder) = info.current_encoder() else {
					return Ok((connector, None));
				};
				let encoder = self
					.card
					.get_encoder(encoder)
					.map_err(DisplayError::io("get encoder"))?;
				Ok((connector, encoder.crtc()))
			})
			.collect()
	}

	fn connector_modes(&self, source_id: u32) -> Result<Vec<Mode>, DisplayError> {
		let connector = self
			.card
			.get_connector(handle::<connector::Handle>("connector", source_id)?, false)
			.map_err(DisplayError::io("get connector"))?;
		Ok(connector.modes().to_vec())
	}
}

fn handle<T: From<RawResourceHandle>>(kind: &'static str, id: u32) -> Result<T, DisplayError> {
	from_u32(id).ok_or(DisplayError::UnknownResource { kind, id })
}

fn mode_name(mode: &Mode) -> String {
	mode.name().to_string_lossy().into_owned()
}

fn driven_by(
	crtc: crtc::Handle,
	routes: impl IntoIterator<Item = (connector::Handle, Option<crtc::Handle>)>,
) -> Vec<connector::Handle> {
	routes
		.into_iter()
		.filter(|(_, driver)| *driver == Some(crtc))
		.map(|(connector, _)| connector)
		.collect()
}

impl DisplayContext for DrmDisplay {
	type Mode = Mode;
	type Snapshot = CrtcSnapshot;

	fn authenticate(&mut self, token: u32) -> Result<(), DisplayError> {
		drm_ffi::auth::auth_magic_token(self.card.as_fd(), token)
			.map_err(DisplayError::io("authenticate magic"))?;
		Ok(())
	}

	fn outputs(&self) -> Result<Vec<OutputInfo>, DisplayError> {
		let resources = self
			.card
			.resource_handles()
			.map_err(DisplayError::io("get resources"))?;
		resources
			.crtcs()
			.iter()
			.map(|&crtc| {
				let info = self
					.card
					.get_crtc(crtc)
					.map_err(DisplayError::io("get crtc"))?;
				Ok(OutputInfo {
					output_id: crtc.into(),
					framebuffer_id: info.framebuffer().map(u32::from),
					position: info.position(),
					mode_name: info.mode().as_ref().map(mode_name),
				})
			})
			.collect()
	}

	fn resolve_mode(&self, source_id: u32, name: &str) -> Result<Mode, DisplayError> {
		let modes = self.connector_modes(source_id)?;
		let found = if name == PREFERRED_MODE {
			modes
				.iter()
				.find(|mode| mode.mode_type().contains(ModeTypeFlags::PREFERRED))
				.or_else(|| modes.first())
		} else {
			modes
				.iter()
				.find(|mode| mode.name().to_bytes() == name.as_bytes())
		};
		found.copied().ok_or_else(|| DisplayError::ModeNotFound {
			source_id,
			name: name.to_owned(),
		})
	}

	fn current_config(&self, output_id: u32) -> Result<CrtcSnapshot, DisplayError> {
		let crtc = handle::<crtc::Handle>("crtc", output_id)?;
		let info = self
			.card
			.get_crtc(crtc)
			.map_err(DisplayError::io("get crtc"))?;
		Ok(CrtcSnapshot {
			framebuffer: info.framebuffer(),
			position: info.position(),
			mode: info.mode(),
			connectors: driven_by(crtc, self.connector_routes()?),
		})
	}

	fn apply_config(
		&mut self,
		output_id: u32,
		source_id: u32,
		framebuffer_id: u32,
		mode: &Mode,
	) -> Result<(), DisplayError> {
		let crtc = handle::<crtc::Handle>("crtc", output_id)?;
		let connector = handle::<connector::Handle>("connector", source_id)?;
		let framebuffer = handle::<framebuffer::Handle>("framebuffer", framebuffer_id)?;
		self.card
			.set_crtc(crtc, Some(framebuffer), (0, 0), &[connector], Some(*mode))
			.map_err(DisplayError::io("set crtc"))?;
		tracing::debug!(output_id, source_id, framebuffer_id, mode = %mode_name(mode), "crtc configured");
		Ok(())
	}

	fn restore_config(&mut self, output_id: u32, snapshot: CrtcSnapshot) -> Result<(), DisplayError> {
		let crtc = handle::<crtc::Handle>("crtc", output_id)?;
		match snapshot.mode {
			// A mode with no connector attached cannot be set again.
			Some(mode) if !snapshot.connectors.is_empty() => {
				self.card
					.set_crtc(
						crtc,
						snapshot.framebuffer,
						snapshot.position,
						&snapshot.connectors,
						Some(mode),
					)
					.map_err(DisplayError::io("restore crtc"))?;
			}
			_ => {
				self.card
					.set_crtc(crtc, None, (0, 0), &[], None)
					.map_err(DisplayError::io("disable crtc"))?;
			}
		}
		Ok(())
	}

	fn apply_overlay(
		&mut self,
		overlay_id: u32,
		output_id: u32,
		framebuffer_id: u32,
		geometry: Geometry,
	) -> Result<(), DisplayError> {
		let plane = handle::<plane::Handle>("plane", overlay_id)?;
		let crtc = handle::<crtc::Handle>("crtc", output_id)?;
		let framebuffer = handle::<framebuffer::Handle>("framebuffer", framebuffer_id)?;
		// Source rectangle is 16.16 fixed point.
		let (Some(src_w), Some(src_h)) = (
			geometry.width.checked_mul(1 << 16),
			geometry.height.checked_mul(1 << 16),
		) else {
			return Err(DisplayError::InvalidGeometry(geometry));
		};
		self.card
			.set_plane(
				plane,
				crtc,
				Some(framebuffer),
				0,
				(geometry.x, geometry.y, geometry.width, geometry.height),
				(0, 0, src_w, src_h),
			)
			.map_err(DisplayError::io("set plane"))?;
		Ok(())
	}

	fn detach_overlay(&mut self, overlay_id: u32, output_id: u32) -> Result<(), DisplayError> {
		let plane = handle::<plane::Handle>("plane", overlay_id)?;
		let crtc = handle::<crtc::Handle>("crtc", output_id)?;
		self.card
			.set_plane(plane, crtc, None, 0, (0, 0, 0, 0), (0, 0, 0, 0))
			.map_err(DisplayError::io("detach plane"))?;
		Ok(())
	}
}
