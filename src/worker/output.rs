//! Output capture and classification.

use std::io::{self, Read};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::debug;

const READ_CHUNK: usize = 8 * 1024;

/// Append-only byte buffer holding one stream of one run.
#[derive(Debug, Default)]
pub struct Accumulator {
    bytes: Vec<u8>,
}

impl Accumulator {
    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Move everything `other` holds onto the end of this buffer.
    pub fn absorb(&mut self, other: Accumulator) {
        self.bytes.extend(other.bytes);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn release(&mut self) {
        self.bytes = Vec::new();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Trimmed standard output.
    Success(String),
    /// Full, untrimmed error output.
    Failure(String),
}

/// Any byte on the error stream means failure. The exit code is not consulted.
pub fn classify(stdout: &Accumulator, stderr: &Accumulator) -> Outcome {
    if !stderr.is_empty() {
        Outcome::Failure(stderr.text())
    } else {
        Outcome::Success(stdout.text().trim().to_string())
    }
}

/// Receiving ends of the two pipe reader threads.
///
/// Each pipe gets a thread that forwards raw chunks over a channel, so a drain
/// only ever takes what has already been read and never blocks on the pipe.
#[derive(Debug, Default)]
pub struct OutputStreams {
    stdout: Option<Receiver<Vec<u8>>>,
    stderr: Option<Receiver<Vec<u8>>>,
}

impl OutputStreams {
    pub fn capture<O, E>(stdout: Option<O>, stderr: Option<E>) -> Self
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        Self {
            stdout: stdout.map(|pipe| spawn_reader("stdout", pipe)),
            stderr: stderr.map(|pipe| spawn_reader("stderr", pipe)),
        }
    }

    /// Streams for a process whose pipes are not ours to read.
    pub fn none() -> Self {
        Self::default()
    }

    /// Move everything already read into the accumulators. Returns the number
    /// of bytes moved.
    pub fn drain_into(&self, out: &mut Accumulator, err: &mut Accumulator) -> usize {
        let mut moved = 0;
        if let Some(rx) = &self.stdout {
            for chunk in rx.try_iter() {
                moved += chunk.len();
                out.append(&chunk);
            }
        }
        if let Some(rx) = &self.stderr {
            for chunk in rx.try_iter() {
                moved += chunk.len();
                err.append(&chunk);
            }
        }
        moved
    }

    /// Drain until both readers reach end of file, or `grace` runs out.
    ///
    /// Only meaningful after the process has exited. The bound covers
    /// grandchildren that inherited the pipes and keep them open.
    pub fn drain_to_end(&self, out: &mut Accumulator, err: &mut Accumulator, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut moved = 0;
        for (rx, acc) in [(&self.stdout, &mut *out), (&self.stderr, &mut *err)] {
            let Some(rx) = rx else { continue };
            loop {
                match rx.recv_deadline(deadline) {
                    Ok(chunk) => {
                        moved += chunk.len();
                        acc.append(&chunk);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        debug!("Output pipe still open after exit; giving up on trailing output.");
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        moved
    }
}

/// Reads `pipe` until EOF. Once the receiver is dropped the thread keeps
/// reading into the void so the writer never sees a broken pipe.
fn spawn_reader<R: Read + Send + 'static>(name: &'static str, mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        debug!("{} detached; discarding remaining output.", name);
                        let _ = io::copy(&mut pipe, &mut io::sink());
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("{} reader stopped: {}", name, e);
                    break;
                }
            }
        }
    });
    rx
}
