use std::{
	fs::{File, OpenOptions},
	os::fd::{AsFd, BorrowedFd},
	path::Path,
};

use drm::{
	Device,
	buffer::DrmFourcc,
	control::{
		Device as ControlDevice, Mode, ModeTypeFlags, RawResourceHandle, connector,
		dumbbuffer::DumbBuffer, framebuffer, from_u32,
	},
};
use kms_protocol::PREFERRED_MODE;

use crate::KmsClientError;

/// A DRM card opened by an unprivileged client.
#[derive(Debug)]
pub struct Card(File);

impl AsFd for Card {
	fn as_fd(&self) -> BorrowedFd<'_> {
		self.0.as_fd()
	}
}

impl Device for Card {}

impl ControlDevice for Card {}

fn handle<T: From<RawResourceHandle>>(kind: &'static str, id: u32) -> Result<T, KmsClientError> {
	from_u32(id).ok_or(KmsClientError::UnknownResource { kind, id })
}

/// Logs a failed teardown step. Returns whether the step succeeded.
fn cleanup(step: &str, result: std::io::Result<()>) -> bool {
	match result {
		Ok(()) => true,
		Err(e) => {
			tracing::warn!("failed to {step}: {e}");
			false
		}
	}
}

impl Card {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, KmsClientError> {
		let mut options = OpenOptions::new();
		options.read(true);
		options.write(true);
		let file = options
			.open(path)
			.map_err(KmsClientError::device("open card"))?;
		Ok(Card(file))
	}

	/// Gives up master if opening the node made us master, so the broker
	/// keeps mode-setting rights.
	pub fn drop_master(&self) {
		if let Err(e) = self.release_master_lock() {
			tracing::debug!("not DRM master: {e}");
		}
	}

	/// Magic the broker passes to the kernel to authenticate this fd.
	pub fn magic(&self) -> Result<u32, KmsClientError> {
		let auth = drm_ffi::auth::get_magic_token(self.as_fd())
			.map_err(KmsClientError::device("get magic"))?;
		Ok(auth.magic)
	}

	/// Finds a mode on `connector_id`; [`PREFERRED_MODE`] picks the preferred one.
	pub fn find_mode(&self, connector_id: u32, name: &str) -> Result<Mode, KmsClientError> {
		let connector = self
			.get_connector(handle::<connector::Handle>("connector", connector_id)?, false)
			.map_err(KmsClientError::device("get connector"))?;
		let modes = connector.modes();
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
		found.copied().ok_or_else(|| KmsClientError::ModeNotFound {
			connector_id,
			name: name.to_owned(),
		})
	}

	/// Allocates a dumb buffer of `size`, fills it with `color` (XRGB8888) and
	/// registers it as a framebuffer.
	pub fn solid_framebuffer(
		&self,
		size: (u32, u32),
		color: u32,
	) -> Result<SolidFramebuffer, KmsClientError> {
		let mut buffer = self
			.create_dumb_buffer(size, DrmFourcc::Xrgb8888, 32)
			.map_err(KmsClientError::device("create dumb buffer"))?;
		let filled = self
			.map_dumb_buffer(&mut buffer)
			.map_err(KmsClientError::device("map dumb buffer"))
			.map(|mut mapping| {
				for pixel in mapping.chunks_exact_mut(4) {
					pixel.copy_from_slice(&color.to_le_bytes());
				}
			});
		let framebuffer = filled.and_then(|()| {
			self.add_framebuffer(&buffer, 24, 32)
				.map_err(KmsClientError::device("add framebuffer"))
		});
		match framebuffer {
			Ok(framebuffer) => {
				tracing::debug!(
					framebuffer_id = u32::from(framebuffer),
					width = size.0,
					height = size.1,
					"framebuffer ready"
				);
				Ok(SolidFramebuffer {
					buffer,
					framebuffer,
				})
			}
			Err(e) => {
				cleanup("destroy dumb buffer", self.destroy_dumb_buffer(buffer));
				Err(e)
			}
		}
	}
}

/// A filled dumb buffer registered with the kernel.
#[derive(Debug)]
pub struct SolidFramebuffer {
	buffer: DumbBuffer,
	framebuffer: framebuffer::Handle,
}

impl SolidFramebuffer {
	pub fn id(&self) -> u32 {
		self.framebuffer.into()
	}

	pub fn destroy(self, card: &Card) {
		cleanup("remove framebuffer", card.destroy_framebuffer(self.framebuffer));
		cleanup("destroy dumb buffer", card.destroy_dumb_buffer(self.buffer));
	}
}
