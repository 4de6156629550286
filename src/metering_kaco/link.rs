use super::KacoError;
use log::{debug, warn};
use regex::Regex;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

pub const DEFAULT_TCP_PORT: u16 = 23;
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_PORT_DIR: &str = "/dev";
pub const DEFAULT_PORT_PATTERN: &str = r"^ttyUSB[0-9]+$";

/// Byte channel to the RS485 bus. All framing happens in the collector.
pub trait Link {
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Blocks up to `timeout` and reports whether bytes can be read.
    fn is_data_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    fn receive(&mut self, max_bytes: usize) -> io::Result<Vec<u8>>;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send(data)
    }

    fn is_data_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).is_data_ready(timeout)
    }

    fn receive(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        (**self).receive(max_bytes)
    }
}

/// RS485 reached through a serial-to-network converter.
pub struct TcpLink {
    stream: TcpStream,
    peer: String,
}

impl TcpLink {
    pub fn connect(host: &str, port: u16) -> Result<Self, KacoError> {
        let stream = TcpStream::connect((host, port))?;
        let _ = stream.set_nodelay(true);
        debug!("Connected to {}:{}", host, port);

        return Ok(TcpLink {
            stream,
            peer: format!("{}:{}", host, port),
        });
    }

}

impl Link for TcpLink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn is_data_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        /* a zero read timeout is rejected by the OS */
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;

        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => {
                warn!("Connection to {} was closed by the peer", self.peer);
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn receive(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let n = self.stream.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

#[cfg(feature = "serial")]
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialLink {
    /// Opens the port with 8N1 framing.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, KacoError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(io::Error::from)?;
        debug!("Opened serial port {} with {} baud", path, baud_rate);

        return Ok(SerialLink { port });
    }
}

#[cfg(feature = "serial")]
impl Link for SerialLink {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn is_data_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        let start = std::time::Instant::now();
        loop {
            if self.port.bytes_to_read()? > 0 {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn receive(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let available = self.port.bytes_to_read()? as usize;
        let mut buf = vec![0u8; available.clamp(1, max_bytes.max(1))];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Lists device files in `dir` whose name matches `pattern`, sorted.
pub fn discover_serial_ports(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, KacoError> {
    let re = Regex::new(pattern)?;

    let mut ports: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| re.is_match(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();

    ports.sort();
    return Ok(ports);
}

/// Resolves `auto` to the first matching port under `/dev`.
pub fn resolve_serial_port(configured: &str) -> Result<String, KacoError> {
    if configured != "auto" {
        return Ok(configured.to_string());
    }

    let ports = discover_serial_ports(Path::new(DEFAULT_PORT_DIR), DEFAULT_PORT_PATTERN)?;
    match ports.first() {
        Some(p) => {
            debug!("Found serial ports {:?}, using the first one", ports);
            Ok(p.to_string_lossy().to_string())
        }
        None => Err(KacoError::NoSerialPort(format!("{}/{}", DEFAULT_PORT_DIR, DEFAULT_PORT_PATTERN))),
    }
}

#[cfg(test)]
pub use mock::MockLink;

#[cfg(test)]
mod mock {
    use super::Link;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::time::Duration;

    /// Replays scripted replies per request; a request without script stays silent.
    pub struct MockLink {
        replies: HashMap<String, VecDeque<Vec<Vec<u8>>>>,
        pending: VecDeque<Vec<u8>>,
        sent: Vec<String>,
    }

    impl MockLink {
        pub fn new() -> Self {
            MockLink {
                replies: HashMap::new(),
                pending: VecDeque::new(),
                sent: Vec::new(),
            }
        }

        /// Queues one reply given as chunks. The last queued reply repeats.
        pub fn add_reply(&mut self, request: &str, chunks: Vec<Vec<u8>>) {
            self.replies.entry(request.to_string()).or_default().push_back(chunks);
        }

        pub fn add_text_reply(&mut self, request: &str, text: &str) {
            self.add_reply(request, vec![text.as_bytes().to_vec()]);
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.clone()
        }
    }

    impl Link for MockLink {
        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            let request = String::from_utf8_lossy(data).to_string();
            self.pending.clear();

            if let Some(queue) = self.replies.get_mut(&request) {
                let chunks = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
                if let Some(chunks) = chunks {
                    self.pending.extend(chunks);
                }
            }

            self.sent.push(request);
            Ok(())
        }

        fn is_data_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(!self.pending.is_empty())
        }

        fn receive(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
            let mut chunk = self.pending.pop_front().unwrap_or_default();
            if chunk.len() > max_bytes {
                let rest = chunk.split_off(max_bytes);
                self.pending.push_front(rest);
            }
            Ok(chunk)
        }
    }
}
