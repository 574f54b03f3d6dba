// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{SerialPort, UartConfig, UartError, UartResult};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const READ_CHUNK: usize = 256;

/// UART backend over host byte streams (stdin/stdout, a FIFO, a tty node).
///
/// A reader thread feeds received bytes through a channel. A receive call
/// keeps collecting until the buffer is full or the window closes, the way
/// a driver-level `read_bytes` with a tick timeout behaves.
pub struct StreamUart<W: Write + Send> {
    config: UartConfig,
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    rx_closed: bool,
    tx: W,
    tick: Duration,
}

impl<W: Write + Send> std::fmt::Debug for StreamUart<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamUart")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("rx_closed", &self.rx_closed)
            .field("tick", &self.tick)
            .finish()
    }
}

impl<W: Write + Send> StreamUart<W> {
    pub fn spawn<R>(
        config: UartConfig,
        reader: R,
        writer: W,
        tick: Duration,
    ) -> UartResult<Self>
    where
        R: Read + Send + 'static,
    {
        config.validate()?;
        let capacity = config.rx_buffer_size;
        let (sender, rx) =
            mpsc::sync_channel::<Vec<u8>>(capacity.div_ceil(READ_CHUNK).max(1));

        thread::Builder::new()
            .name(format!("uart{}_rx", config.port))
            .spawn(move || {
                let mut reader = reader;
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => {
                            debug!("UART RX stream reached EOF");
                            break;
                        }
                        Ok(n) => {
                            if sender.send(chunk[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) => {
                            warn!("UART RX stream failed: {}", e);
                            break;
                        }
                    }
                }
            })?;

        tracing::info!(
            "UART{} attached to host stream: {}",
            config.port,
            config.framing()
        );
        Ok(Self {
            config,
            rx,
            pending: VecDeque::new(),
            rx_closed: false,
            tx: writer,
            tick,
        })
    }

    pub fn config(&self) -> &UartConfig {
        &self.config
    }
}

impl<W: Write + Send> SerialPort for StreamUart<W> {
    fn read_bytes(&mut self, buf: &mut [u8], timeout_ticks: u32) -> UartResult<usize> {
        let deadline = Instant::now() + self.tick * timeout_ticks;

        while !self.rx_closed && self.pending.len() < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.rx_closed = true,
            }
        }

        if self.pending.is_empty() && self.rx_closed {
            return Err(UartError::Disconnected);
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> UartResult<usize> {
        self.tx.write_all(data)?;
        self.tx.flush()?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tick() -> Duration {
        Duration::from_millis(1)
    }

    #[test]
    fn test_stream_collects_until_eof() {
        let mut uart = StreamUart::spawn(
            UartConfig::default(),
            Cursor::new(b"hello".to_vec()),
            Vec::new(),
            tick(),
        )
        .unwrap();

        let mut buf = [0u8; 64];
        let n = uart.read_bytes(&mut buf, 200).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(matches!(
            uart.read_bytes(&mut buf, 20),
            Err(UartError::Disconnected)
        ));
    }

    #[test]
    fn test_stream_holds_overflow_for_next_call() {
        let mut uart = StreamUart::spawn(
            UartConfig::default(),
            Cursor::new(b"abcdefgh".to_vec()),
            Vec::new(),
            tick(),
        )
        .unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(uart.read_bytes(&mut buf, 200).unwrap(), 5);
        assert_eq!(&buf, b"abcde");
        let n = uart.read_bytes(&mut buf, 200).unwrap();
        assert_eq!(&buf[..n], b"fgh");
    }

    #[cfg(unix)]
    #[test]
    fn test_stream_times_out_without_data() {
        let (_keep_open, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut uart =
            StreamUart::spawn(UartConfig::default(), reader, Vec::new(), tick()).unwrap();

        let mut buf = [0u8; 8];
        let start = Instant::now();
        assert_eq!(uart.read_bytes(&mut buf, 20).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stream_write_reaches_writer() {
        let mut uart = StreamUart::spawn(
            UartConfig::default(),
            Cursor::new(Vec::new()),
            Vec::new(),
            tick(),
        )
        .unwrap();
        uart.write_bytes(b"out").unwrap();
        assert_eq!(uart.tx, b"out".to_vec());
    }
}
