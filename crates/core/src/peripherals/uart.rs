// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{SerialPort, UartConfig, UartError, UartResult};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct RxLine {
    fifo: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct RxShared {
    line: Mutex<RxLine>,
    ready: Condvar,
}

impl RxShared {
    fn lock(&self) -> MutexGuard<'_, RxLine> {
        self.line.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The far end of a [`SimUart`] receive line.
#[derive(Debug, Clone)]
pub struct SimRxHandle {
    shared: Arc<RxShared>,
}

impl SimRxHandle {
    /// Queue bytes as if they arrived on the RX pin.
    pub fn inject(&self, data: &[u8]) {
        self.shared.lock().fifo.extend(data.iter().copied());
        self.shared.ready.notify_all();
    }

    /// Hang up the line. Receives fail with `Disconnected` once drained.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
    }

    /// Bytes not yet picked up by the peripheral.
    pub fn pending(&self) -> usize {
        self.shared.lock().fifo.len()
    }
}

/// Simulated UART peripheral with a receive FIFO and a capturing TX sink.
///
/// Time is counted in scheduler ticks. Without a tick duration a receive
/// window never sleeps, which keeps tests deterministic.
#[derive(Debug, serde::Serialize)]
pub struct SimUart {
    config: UartConfig,
    #[serde(skip)]
    rx: Arc<RxShared>,
    #[serde(skip)]
    sink: Option<Arc<Mutex<Vec<u8>>>>,
    echo_stdout: bool,
    chunk_limit: Option<usize>,
    #[serde(skip)]
    tick: Option<Duration>,
    elapsed_ticks: u64,
    rx_total: u64,
    tx_total: u64,
}

impl Default for SimUart {
    fn default() -> Self {
        Self::new()
    }
}

impl SimUart {
    pub fn new() -> Self {
        Self {
            config: UartConfig::default(),
            rx: Arc::new(RxShared::default()),
            sink: None,
            echo_stdout: false,
            chunk_limit: None,
            tick: None,
            elapsed_ticks: 0,
            rx_total: 0,
            tx_total: 0,
        }
    }

    /// Install the driver with `config`, rejecting settings the line cannot use.
    pub fn install(config: UartConfig) -> UartResult<Self> {
        config.validate()?;
        tracing::info!(
            "UART{} installed: {} (tx pin {}, rx pin {})",
            config.port,
            config.framing(),
            config.tx_pin,
            config.rx_pin
        );
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &UartConfig {
        &self.config
    }

    pub fn rx_handle(&self) -> SimRxHandle {
        SimRxHandle {
            shared: Arc::clone(&self.rx),
        }
    }

    pub fn set_sink(&mut self, sink: Option<Arc<Mutex<Vec<u8>>>>, echo_stdout: bool) {
        self.sink = sink;
        self.echo_stdout = echo_stdout;
    }

    /// Deliver at most `limit` bytes per receive call.
    pub fn set_chunk_limit(&mut self, limit: Option<usize>) {
        self.chunk_limit = limit;
    }

    /// Let receive windows take real time: `ticks * tick`.
    pub fn set_tick(&mut self, tick: Option<Duration>) {
        self.tick = tick;
    }

    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn push_tx(&mut self, data: &[u8]) {
        if let Some(sink) = &self.sink {
            if let Ok(mut guard) = sink.lock() {
                guard.extend_from_slice(data);
            }
        }

        if self.echo_stdout {
            let mut stdout = io::stdout().lock();
            if stdout.write_all(data).and_then(|_| stdout.flush()).is_err() {
                tracing::warn!("UART{} stdout mirror failed", self.config.port);
            }
        }
    }
}

impl SerialPort for SimUart {
    fn read_bytes(&mut self, buf: &mut [u8], timeout_ticks: u32) -> UartResult<usize> {
        let rx = Arc::clone(&self.rx);
        let mut line = rx.lock();

        if line.fifo.is_empty() && !line.closed {
            if let Some(tick) = self.tick {
                let window = tick * timeout_ticks;
                line = rx
                    .ready
                    .wait_timeout_while(line, window, |l| l.fifo.is_empty() && !l.closed)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            }
        }

        if line.fifo.is_empty() {
            if line.closed {
                return Err(UartError::Disconnected);
            }
            self.elapsed_ticks += u64::from(timeout_ticks);
            return Ok(0);
        }

        let mut n = buf.len().min(line.fifo.len());
        if let Some(limit) = self.chunk_limit {
            n = n.min(limit);
        }
        for (slot, byte) in buf.iter_mut().zip(line.fifo.drain(..n)) {
            *slot = byte;
        }
        if n < buf.len() {
            self.elapsed_ticks += u64::from(timeout_ticks);
        }
        self.rx_total += n as u64;
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> UartResult<usize> {
        self.push_tx(data);
        self.tx_total += data.len() as u64;
        Ok(data.len())
    }
}
