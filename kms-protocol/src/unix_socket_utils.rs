use std::{io, os::unix::net::UnixStream, path::Path};

use nix::sys::socket::{AddressFamily, SockFlag, SockType, UnixAddr, connect, socket};
use std::os::fd::AsRawFd;

/// Opens a blocking stream connection to the broker socket at `path`.
pub fn connect_stream(path: impl AsRef<Path>) -> io::Result<UnixStream> {
	let fd = socket(
		AddressFamily::Unix,
		SockType::Stream,
		SockFlag::SOCK_CLOEXEC,
		None,
	)?;
	let addr = UnixAddr::new(path.as_ref())?;
	connect(fd.as_raw_fd(), &addr)?;
	tracing::debug!(path = %path.as_ref().display(), "connected to broker");
	Ok(UnixStream::from(fd))
}
