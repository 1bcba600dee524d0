//! Byte transport underneath [`Radar::service`](crate::Radar::service).

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

/// Non-blocking byte pipe to the radar's UART
pub trait Transport {
    /// Read whatever is available, returning 0 when nothing is
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write the whole frame
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Adapts any `Read + Write` stream, such as a serial port opened with a
/// short read timeout.
#[derive(Debug)]
pub struct IoTransport<T> {
    inner: T,
}

impl<T: Read + Write> IoTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write> Transport for IoTransport<T> {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.inner.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// In-memory transport for tests. Clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockBuffers>>,
}

#[derive(Debug, Default)]
struct MockBuffers {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffers(&self) -> MutexGuard<'_, MockBuffers> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes for the next reads
    pub fn inject_read(&self, data: &[u8]) {
        self.buffers().read_buffer.extend(data);
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.buffers().write_buffer.clone()
    }

    /// Everything written so far, clearing the buffer
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.buffers().write_buffer)
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut buffers = self.buffers();
        let available = buffers.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(buffers.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffers().write_buffer.extend_from_slice(data);
        Ok(())
    }
}
