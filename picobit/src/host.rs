//! The VM's view of the machine it runs on: a byte sink, a non-blocking
//! byte source and a 100 Hz clock.
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
    thread,
    time::Instant,
};

use log::{debug, warn};
use parking_lot::Mutex;

/// Clock rate of [`Host::ticks`].
pub const TICKS_PER_SECOND: u32 = 100;

pub trait Host {
    fn write(&mut self, bytes: &[u8]);
    /// The next input byte, if one is ready.
    fn read_byte(&mut self) -> Option<u8>;
    /// Time since start in hundredths of a second.
    fn ticks(&mut self) -> u32;
}

// ── Terminal ──────────────────────────────────────────────────────────

/// Stdout plus a reader thread that buffers stdin. Clones share the input
/// buffer and the clock.
#[derive(Clone)]
pub struct Terminal {
    input: Arc<Mutex<VecDeque<u8>>>,
    start: Instant,
}

impl Terminal {
    pub fn new() -> io::Result<Self> {
        let input = Arc::new(Mutex::new(VecDeque::new()));
        let feed = Arc::clone(&input);
        thread::Builder::new()
            .name("picobit-stdin".into())
            .spawn(move || read_stdin(feed))?;
        Ok(Self {
            input,
            start: Instant::now(),
        })
    }
}

fn read_stdin(feed: Arc<Mutex<VecDeque<u8>>>) {
    let mut stdin = io::stdin().lock();
    let mut buf = [0u8; 256];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => {
                debug!("stdin closed");
                return;
            }
            Ok(n) => feed.lock().extend(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("stdin: {e}");
                return;
            }
        }
    }
}

impl Host for Terminal {
    fn write(&mut self, bytes: &[u8]) {
        let mut out = io::stdout().lock();
        if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
            warn!("stdout: {e}");
        }
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.lock().pop_front()
    }

    fn ticks(&mut self) -> u32 {
        let elapsed = self.start.elapsed();
        (elapsed.as_millis() / (1000 / TICKS_PER_SECOND as u128)) as u32
    }
}

// ── BufferHost ────────────────────────────────────────────────────────

/// Output shared between a [`BufferHost`] and whoever inspects it.
pub type Transcript = Arc<Mutex<Vec<u8>>>;

/// In-memory host with scripted input. Its clock advances one tick per
/// reading, so timeouts always expire.
#[derive(Default)]
pub struct BufferHost {
    output: Transcript,
    input: VecDeque<u8>,
    ticks: u32,
}

impl BufferHost {
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn transcript(&self) -> Transcript {
        Arc::clone(&self.output)
    }
}

impl Host for BufferHost {
    fn write(&mut self, bytes: &[u8]) {
        self.output.lock().extend_from_slice(bytes);
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn ticks(&mut self) -> u32 {
        let now = self.ticks;
        self.ticks = self.ticks.wrapping_add(1);
        now
    }
}
