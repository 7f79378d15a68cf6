//! Test helpers: a scripted controller on a local socket and a recording handler

#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use isy_stream::xml::{attr_from_xml, value_from_xml};
use isy_stream::{EventHandler, StreamConfig};
use xmltree::Element;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Load an event body from the fixtures directory
pub fn fixture(filename: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(filename);

    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", filename, e))
}

/// Wrap a body the way the controller frames it on the stream
pub fn framed(body: &str) -> Vec<u8> {
    format!(
        "POST reuse HTTP/1.1\r\nHOST:127.0.0.1\r\nCONTENT-TYPE:text/xml\r\nCONTENT-LENGTH: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// A listening socket standing in for the controller
pub struct MockController {
    listener: TcpListener,
}

impl MockController {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock controller");
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Client configuration pointing at this controller, polling quickly
    pub fn config(&self) -> StreamConfig {
        StreamConfig::new("127.0.0.1", self.port()).with_poll_interval(Duration::from_millis(50))
    }

    pub fn accept(&self) -> ControllerConnection {
        let (stream, _) = self.listener.accept().expect("Failed to accept client");
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        ControllerConnection {
            stream,
            pending: Vec::new(),
        }
    }
}

/// The controller's end of one client connection
pub struct ControllerConnection {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl ControllerConnection {
    /// Read one request: header block plus content-length body
    pub fn read_request(&mut self) -> String {
        let header_end = loop {
            if let Some(pos) = find(&self.pending, b"\r\n\r\n") {
                break pos + 4;
            }
            self.fill();
        };

        let head = String::from_utf8_lossy(&self.pending[..header_end]).to_string();
        let length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .expect("Request without content-length");

        while self.pending.len() < header_end + length {
            self.fill();
        }

        let request: Vec<u8> = self.pending.drain(..header_end + length).collect();
        String::from_utf8(request).expect("Request is not UTF-8")
    }

    fn fill(&mut self) {
        let mut buf = [0u8; 1024];
        let n = self.stream.read(&mut buf).expect("Failed to read from client");
        assert!(n > 0, "Client closed the connection");
        self.pending.extend_from_slice(&buf[..n]);
    }

    /// Whether the client has closed its end
    pub fn is_closed_by_client(&mut self) -> bool {
        let mut buf = [0u8; 1024];
        matches!(self.stream.read(&mut buf), Ok(0))
    }

    pub fn send_event(&mut self, body: &str) {
        self.send_raw(&framed(body));
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("Failed to write event");
        self.stream.flush().unwrap();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// What a [`Recorder`] saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    NodeStatus(String),
    NodeControl(String),
    Variable(String),
    Program(String),
    ProgramRefresh,
    Lost,
}

/// Handler that forwards every callback to a channel
pub struct Recorder {
    tx: Mutex<Sender<Observed>>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Receiver<Observed>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }

    fn send(&self, observed: Observed) {
        let _ = self.tx.lock().unwrap().send(observed);
    }
}

impl EventHandler for Recorder {
    fn on_node_status(&self, doc: &Element) {
        self.send(Observed::NodeStatus(value_from_xml(doc, "node").unwrap_or_default()));
    }

    fn on_node_control(&self, doc: &Element) {
        self.send(Observed::NodeControl(value_from_xml(doc, "control").unwrap_or_default()));
    }

    fn on_variable_update(&self, doc: &Element) {
        self.send(Observed::Variable(attr_from_xml(doc, "var", "id").unwrap_or_default()));
    }

    fn on_program_update(&self, doc: &Element) {
        self.send(Observed::Program(value_from_xml(doc, "id").unwrap_or_default()));
    }

    fn on_program_list_refresh(&self) {
        self.send(Observed::ProgramRefresh);
    }

    fn on_connection_lost(&self) {
        self.send(Observed::Lost);
    }
}

/// Next observation, failing the test after [`TIMEOUT`]
pub fn next(rx: &Receiver<Observed>) -> Observed {
    rx.recv_timeout(TIMEOUT).expect("Timed out waiting for handler callback")
}

/// Poll `condition` until it holds or [`TIMEOUT`] passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
