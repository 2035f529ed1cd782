use std::{
	io::Read,
	os::unix::net::UnixStream,
	path::{Path, PathBuf},
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use kms_protocol::{Command, ErrorReason, FrameReader, Request, Response, message_frame};
use kmsd::{
	Broker, ServeError,
	display::{MemoryDisplay, MemoryOutput},
};

const CONNECTOR: u32 = 30;
const OUTPUT: u32 = 40;

fn socket_path() -> PathBuf {
	static COUNTER: AtomicUsize = AtomicUsize::new(0);
	std::env::temp_dir().join(format!(
		"kmsd-test-{}-{}.sock",
		std::process::id(),
		COUNTER.fetch_add(1, Ordering::Relaxed)
	))
}

fn initial_output() -> MemoryOutput {
	MemoryOutput {
		framebuffer_id: Some(1),
		source_id: Some(CONNECTOR),
		mode: Some("1280x720".into()),
	}
}

struct RunningBroker {
	path: PathBuf,
	display: MemoryDisplay,
	shutdown: Arc<AtomicBool>,
	handle: JoinHandle<Result<(), ServeError>>,
}

impl RunningBroker {
	fn start(max_clients: usize) -> Self {
		let path = socket_path();
		let display = MemoryDisplay::new()
			.with_token(42)
			.with_token(43)
			.with_connector(CONNECTOR, &["1920x1080", "1280x720"])
			.with_output(OUTPUT, initial_output())
			.with_overlay(50);
		let broker = Broker::bind(&path, display.clone())
			.unwrap()
			.with_max_clients(max_clients)
			.with_poll_timeout_ms(50);
		let shutdown = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&shutdown);
		let handle = thread::spawn(move || broker.serve(&flag));
		Self {
			path,
			display,
			shutdown,
			handle,
		}
	}

	fn connect(&self) -> TestClient {
		TestClient::connect(&self.path)
	}

	fn stop(self) -> (PathBuf, MemoryDisplay) {
		self.shutdown.store(true, Ordering::Relaxed);
		self.handle.join().unwrap().unwrap();
		(self.path, self.display)
	}
}

struct TestClient {
	stream: UnixStream,
	reader: FrameReader,
}

impl TestClient {
	fn connect(path: &Path) -> Self {
		let stream = UnixStream::connect(path).unwrap();
		stream
			.set_read_timeout(Some(Duration::from_secs(2)))
			.unwrap();
		Self {
			stream,
			reader: FrameReader::new(),
		}
	}

	fn send_raw(&mut self, body: &str) {
		message_frame::write_frame(&self.stream, body).unwrap();
	}

	fn request(&mut self, token: u32, command: Command) -> Response {
		Request::new(token, command)
			.encode_and_send(&self.stream)
			.unwrap();
		self.response()
	}

	fn response(&mut self) -> Response {
		let frame = self.reader.read_framed(&self.stream).unwrap();
		Response::decode(&frame).unwrap()
	}

	/// True once the broker has closed its end.
	fn is_closed(&mut self) -> bool {
		let mut buf = [0u8; 16];
		matches!((&self.stream).read(&mut buf), Ok(0))
	}
}

fn overlay(framebuffer_id: u32) -> Command {
	Command::AcquireOverlay {
		output_id: OUTPUT,
		overlay_id: 50,
		framebuffer_id,
		geometry: Default::default(),
	}
}

/// Waits until the broker has put the output back after a hangup.
fn wait_for_restore(display: &MemoryDisplay) {
	for _ in 0..50 {
		if display.output(OUTPUT) == Some(initial_output()) {
			return;
		}
		thread::sleep(Duration::from_millis(20));
	}
	panic!("output {OUTPUT} was never restored");
}

fn acquire(output_id: u32, framebuffer_id: u32) -> Command {
	Command::AcquireOutput {
		output_id,
		source_id: CONNECTOR,
		framebuffer_id,
		mode_name: "preferred".into(),
	}
}

#[test]
fn authenticate_acquire_release() {
	let broker = RunningBroker::start(5);
	let mut client = broker.connect();

	assert_eq!(client.request(42, Command::Authenticate), Response::ok(42));
	assert_eq!(client.request(42, acquire(OUTPUT, 500)), Response::ok(42));
	let output = broker.display.output(OUTPUT).unwrap();
	assert_eq!(output.framebuffer_id, Some(500));
	assert_eq!(output.mode.as_deref(), Some("1920x1080"));

	assert_eq!(client.request(42, Command::ReleaseOutput), Response::ok(42));
	assert_eq!(broker.display.output(OUTPUT), Some(initial_output()));
	assert_eq!(client.request(42, Command::ReleaseOutput), Response::ok(42));

	broker.stop();
}

#[test]
fn bad_requests_get_error_replies() {
	let broker = RunningBroker::start(5);
	let mut client = broker.connect();

	assert_eq!(
		client.request(42, acquire(OUTPUT, 500)),
		Response::error(42, ErrorReason::Unauthenticated)
	);
	client.send_raw("42:9");
	assert_eq!(
		client.response(),
		Response::error(42, ErrorReason::UnknownCommand)
	);
	client.send_raw("42:1:40:30");
	assert_eq!(client.response(), Response::error(42, ErrorReason::BadRequest));

	// Still connected.
	assert_eq!(client.request(42, Command::Authenticate), Response::ok(42));

	client.send_raw("hello");
	assert!(client.is_closed());

	broker.stop();
}

#[test]
fn second_client_cannot_take_held_output() {
	let broker = RunningBroker::start(5);
	let mut first = broker.connect();
	let mut second = broker.connect();

	assert!(first.request(42, Command::Authenticate).is_ok());
	assert!(second.request(43, Command::Authenticate).is_ok());
	assert!(first.request(42, acquire(OUTPUT, 500)).is_ok());
	assert_eq!(
		second.request(43, acquire(OUTPUT, 600)),
		Response::error(43, ErrorReason::Conflict)
	);
	assert_eq!(
		broker.display.output(OUTPUT).and_then(|o| o.framebuffer_id),
		Some(500)
	);

	assert!(first.request(42, overlay(501)).is_ok());
	assert_eq!(
		second.request(43, overlay(601)),
		Response::error(43, ErrorReason::Conflict)
	);
	assert_eq!(broker.display.overlay(50).map(|o| o.framebuffer_id), Some(501));

	broker.stop();
}

#[test]
fn disconnect_releases_bindings() {
	let broker = RunningBroker::start(5);
	let mut first = broker.connect();
	assert!(first.request(42, Command::Authenticate).is_ok());
	assert!(first.request(42, acquire(OUTPUT, 500)).is_ok());
	drop(first);

	let mut second = broker.connect();
	assert!(second.request(43, Command::Authenticate).is_ok());
	// The broker handles the hangup before this client's frames.
	let mut acquired = second.request(43, acquire(OUTPUT, 600));
	for _ in 0..20 {
		if acquired.is_ok() {
			break;
		}
		thread::sleep(Duration::from_millis(20));
		acquired = second.request(43, acquire(OUTPUT, 600));
	}
	assert!(acquired.is_ok());
	assert_eq!(
		broker.display.output(OUTPUT).and_then(|o| o.framebuffer_id),
		Some(600)
	);

	assert!(second.request(43, Command::ReleaseOutput).is_ok());
	assert_eq!(broker.display.output(OUTPUT), Some(initial_output()));

	broker.stop();
}

#[test]
fn connections_beyond_capacity_are_dropped() {
	let broker = RunningBroker::start(2);
	let mut first = broker.connect();
	let mut second = broker.connect();
	assert!(first.request(42, Command::Authenticate).is_ok());
	assert!(second.request(43, Command::Authenticate).is_ok());

	let mut third = broker.connect();
	assert!(third.is_closed());

	assert!(first.request(42, acquire(OUTPUT, 500)).is_ok());
	assert!(second.request(43, Command::ReleaseOutput).is_ok());

	broker.stop();
}

#[test]
fn freed_slot_is_reused_at_capacity() {
	let broker = RunningBroker::start(1);
	let mut first = broker.connect();
	assert!(first.request(42, Command::Authenticate).is_ok());
	assert!(first.request(42, acquire(OUTPUT, 500)).is_ok());
	drop(first);
	// The slot is freed before the output is restored.
	wait_for_restore(&broker.display);

	let mut second = broker.connect();
	assert_eq!(second.request(43, Command::Authenticate), Response::ok(43));
	assert_eq!(second.request(43, acquire(OUTPUT, 600)), Response::ok(43));
	drop(second);
	wait_for_restore(&broker.display);

	// Every slot is free again after the last hangup.
	let mut third = broker.connect();
	assert_eq!(third.request(42, Command::Authenticate), Response::ok(42));

	broker.stop();
}

#[test]
fn shutdown_restores_outputs_and_unlinks_socket() {
	let broker = RunningBroker::start(5);
	let mut client = broker.connect();
	assert!(client.request(42, Command::Authenticate).is_ok());
	assert!(client.request(42, acquire(OUTPUT, 500)).is_ok());
	assert!(client.request(42, overlay(501)).is_ok());

	let (path, display) = broker.stop();
	assert!(!path.exists());
	assert_eq!(display.output(OUTPUT), Some(initial_output()));
	assert_eq!(display.overlay(50), None);
	assert!(client.is_closed());
}
