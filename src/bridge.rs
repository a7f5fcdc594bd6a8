//! A bounded producer/consumer byte bridge.
//!
//! Whole-operation codecs drive both of their streams inside one blocking
//! call. To hand their output to a caller incrementally, that call runs
//! on a background thread writing into one end of a bridge while the
//! caller reads from the other. The queue is strictly FIFO and bounded;
//! suspension pending buffer space or data happens only here.
//!
//! The endpoints are not `Clone`, so the single-writer/single-reader
//! discipline holds by construction. Dropping either endpoint moves the
//! bridge into its terminal completed state and wakes every pending and
//! future wait.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Default queue capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 80 * 1024;

struct State {
    buf: VecDeque<u8>,
    capacity: usize,
    completed: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Signaled when bytes arrive or the bridge completes.
    data: Condvar,
    /// Signaled when bytes drain or the bridge completes.
    space: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn complete(&self) {
        let mut state = self.lock();
        state.completed = true;
        drop(state);
        self.data.notify_all();
        self.space.notify_all();
    }
}

fn wait<'a>(condvar: &Condvar, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
    match condvar.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn completed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "write on a completed byte bridge")
}

/// Creates a bridge with the given capacity in bytes.
///
/// # Panics
///
/// Panics if `capacity` is zero; a zero-capacity bridge could never move
/// a byte.
pub fn byte_bridge(capacity: usize) -> (BridgeWriter, BridgeReader) {
    assert!(capacity > 0, "byte bridge capacity must be nonzero");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            completed: false,
        }),
        data: Condvar::new(),
        space: Condvar::new(),
    });
    (
        BridgeWriter {
            shared: Arc::clone(&shared),
        },
        BridgeReader { shared },
    )
}

/// Creates a bridge with [`DEFAULT_CAPACITY`].
pub fn byte_bridge_default() -> (BridgeWriter, BridgeReader) {
    byte_bridge(DEFAULT_CAPACITY)
}

/// The producing end. Dropping it completes the bridge.
pub struct BridgeWriter {
    shared: Arc<Shared>,
}

impl BridgeWriter {
    /// One-way transition: the reader drains whatever is buffered and
    /// then sees end-of-stream; further writes fail.
    pub fn complete(&mut self) {
        self.shared.complete();
    }

    /// Non-blocking write. `Ok(None)` means the queue is full right now.
    pub fn try_write(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let mut state = self.shared.lock();
        if state.completed {
            return Err(completed_error());
        }
        let room = state.capacity - state.buf.len();
        if room == 0 {
            return Ok(None);
        }
        let n = room.min(buf.len());
        state.buf.extend(buf[..n].iter().copied());
        drop(state);
        self.shared.data.notify_one();
        Ok(Some(n))
    }
}

impl Write for BridgeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if state.completed {
                return Err(completed_error());
            }
            let room = state.capacity - state.buf.len();
            if room > 0 {
                let n = room.min(buf.len());
                state.buf.extend(buf[..n].iter().copied());
                drop(state);
                self.shared.data.notify_one();
                return Ok(n);
            }
            state = wait(&self.shared.space, state);
        }
    }

    /// Blocks until every buffered byte has been consumed or the bridge
    /// has reached its terminal state.
    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.shared.lock();
        while !state.buf.is_empty() && !state.completed {
            state = wait(&self.shared.space, state);
        }
        Ok(())
    }
}

impl Drop for BridgeWriter {
    fn drop(&mut self) {
        self.shared.complete();
    }
}

/// The consuming end. Dropping it completes the bridge, which unblocks
/// (and then fails) a producer stuck waiting for space.
pub struct BridgeReader {
    shared: Arc<Shared>,
}

impl BridgeReader {
    /// Non-blocking read. `Ok(None)` means no bytes are available yet;
    /// `Ok(Some(0))` is end-of-stream.
    pub fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let mut state = self.shared.lock();
        if state.buf.is_empty() {
            return if state.completed {
                Ok(Some(0))
            } else {
                Ok(None)
            };
        }
        let n = drain(&mut state, buf);
        drop(state);
        self.shared.space.notify_one();
        Ok(Some(n))
    }
}

fn drain(state: &mut State, buf: &mut [u8]) -> usize {
    let n = state.buf.len().min(buf.len());
    for (dst, src) in buf.iter_mut().zip(state.buf.drain(..n)) {
        *dst = src;
    }
    n
}

impl Read for BridgeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if !state.buf.is_empty() {
                let n = drain(&mut state, buf);
                drop(state);
                self.shared.space.notify_one();
                return Ok(n);
            }
            if state.completed {
                return Ok(0);
            }
            state = wait(&self.shared.data, state);
        }
    }
}

impl Drop for BridgeReader {
    fn drop(&mut self) {
        self.shared.complete();
    }
}
