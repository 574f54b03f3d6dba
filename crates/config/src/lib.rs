// UART Echo - Store-and-Forward Relay
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";

/// Upper bound for the echo and driver buffers, both allocated up front.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default schema version for YAML manifests
fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    #[serde(alias = "disable", alias = "disabled")]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    #[default]
    #[serde(alias = "none", alias = "off")]
    Disabled,
    #[serde(alias = "rts_cts")]
    Hardware,
}

/// How a received chunk reaches the transmit side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Write the chunk to the relay file, read it back, transmit what was read.
    #[default]
    StoreAndForward,
    /// Transmit the received chunk as-is; the relay file write is auxiliary.
    Direct,
}

/// What the echo task does when a persistence call fails at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorPolicy {
    /// Log and wait for the next UART event.
    #[default]
    Continue,
    /// Stop the echo task and surface the error.
    Abort,
}

fn default_port() -> u8 {
    0
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_tx_pin() -> u8 {
    4
}
fn default_rx_pin() -> u8 {
    5
}
fn default_driver_rx_buffer() -> String {
    "4KiB".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UartSection {
    #[serde(default = "default_port")]
    pub port: u8,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub flow_control: FlowControl,
    #[serde(default = "default_tx_pin")]
    pub tx_pin: u8,
    #[serde(default = "default_rx_pin")]
    pub rx_pin: u8,
    /// Unset means the line is left unchanged.
    #[serde(default)]
    pub rts_pin: Option<u8>,
    #[serde(default)]
    pub cts_pin: Option<u8>,
    #[serde(default = "default_driver_rx_buffer")]
    pub driver_rx_buffer: String,
}

impl Default for UartSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
            flow_control: FlowControl::default(),
            tx_pin: default_tx_pin(),
            rx_pin: default_rx_pin(),
            rts_pin: None,
            cts_pin: None,
            driver_rx_buffer: default_driver_rx_buffer(),
        }
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from("spiffs")
}
fn default_relay_file() -> String {
    "uart_data.txt".to_string()
}
fn default_max_files() -> usize {
    5
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// Relative to `base_path`.
    #[serde(default = "default_relay_file")]
    pub relay_file: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_true")]
    pub format_if_mount_failed: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            relay_file: default_relay_file(),
            max_files: default_max_files(),
            format_if_mount_failed: true,
        }
    }
}

fn default_buffer_size() -> String {
    "2KiB".to_string()
}
fn default_rx_timeout_ticks() -> u32 {
    20
}
fn default_tick_ms() -> u64 {
    1
}
fn default_task_stack_size() -> String {
    "64KiB".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EchoSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,
    #[serde(default = "default_rx_timeout_ticks")]
    pub rx_timeout_ticks: u32,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_task_stack_size")]
    pub task_stack_size: String,
    #[serde(default)]
    pub mode: RelayMode,
    #[serde(default)]
    pub on_storage_error: StorageErrorPolicy,
}

impl Default for EchoSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            rx_timeout_ticks: default_rx_timeout_ticks(),
            tick_ms: default_tick_ms(),
            task_stack_size: default_task_stack_size(),
            mode: RelayMode::default(),
            on_storage_error: StorageErrorPolicy::default(),
        }
    }
}

fn default_housekeeping_interval_ms() -> u64 {
    10_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSection {
    #[serde(default = "default_housekeeping_interval_ms")]
    pub housekeeping_interval_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            housekeeping_interval_ms: default_housekeeping_interval_ms(),
        }
    }
}

/// Top-level manifest. Every field defaults to the stock example's constants,
/// so an empty document describes the stock build.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EchoManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub uart: UartSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub echo: EchoSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
}

impl Default for EchoManifest {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            uart: UartSection::default(),
            storage: StorageSection::default(),
            echo: EchoSection::default(),
            supervisor: SupervisorSection::default(),
        }
    }
}

impl EchoManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open manifest at {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document is `null` to serde_yaml, not an empty mapping.
        let manifest: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml).context("Failed to parse Echo Manifest YAML")?
        };
        manifest.validate()?;
        tracing::debug!(
            "Manifest loaded: uart{} @ {} baud, relay file {:?}",
            manifest.uart.port,
            manifest.uart.baud_rate,
            manifest.relay_path()
        );
        Ok(manifest)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize Echo Manifest")
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        let uart = &self.uart;
        if uart.baud_rate == 0 {
            anyhow::bail!("UART 'baud_rate' must be greater than zero");
        }
        if !(5..=8).contains(&uart.data_bits) {
            anyhow::bail!(
                "UART 'data_bits' must be between 5 and 8, got {}",
                uart.data_bits
            );
        }
        if uart.stop_bits != 1 && uart.stop_bits != 2 {
            anyhow::bail!("UART 'stop_bits' must be 1 or 2, got {}", uart.stop_bits);
        }
        if uart.tx_pin == uart.rx_pin {
            anyhow::bail!(
                "UART 'tx_pin' and 'rx_pin' cannot share pin {}",
                uart.tx_pin
            );
        }
        if uart.flow_control == FlowControl::Hardware
            && (uart.rts_pin.is_none() || uart.cts_pin.is_none())
        {
            anyhow::bail!("UART 'flow_control: hardware' needs both 'rts_pin' and 'cts_pin'");
        }

        let buffer_size = self.buffer_size()?;
        if buffer_size < 2 {
            anyhow::bail!(
                "Echo 'buffer_size' must hold at least one byte plus the sentinel, got {}",
                buffer_size
            );
        }
        if buffer_size > MAX_BUFFER_SIZE {
            anyhow::bail!(
                "Echo 'buffer_size' of {} exceeds the {} byte limit",
                buffer_size,
                MAX_BUFFER_SIZE
            );
        }
        let driver_rx_buffer = self.driver_rx_buffer()?;
        if driver_rx_buffer > MAX_BUFFER_SIZE {
            anyhow::bail!(
                "UART 'driver_rx_buffer' of {} exceeds the {} byte limit",
                driver_rx_buffer,
                MAX_BUFFER_SIZE
            );
        }
        if driver_rx_buffer < buffer_size {
            anyhow::bail!(
                "UART 'driver_rx_buffer' ({}) must not be smaller than echo 'buffer_size' ({})",
                driver_rx_buffer,
                buffer_size
            );
        }
        if self.task_stack_size()? == 0 {
            anyhow::bail!("Echo 'task_stack_size' must be greater than zero");
        }
        if self.echo.tick_ms == 0 {
            anyhow::bail!("Echo 'tick_ms' must be greater than zero");
        }

        if self.storage.max_files == 0 {
            anyhow::bail!("Storage 'max_files' must be greater than zero");
        }
        validate_relay_file(&self.storage.relay_file)?;

        if self.supervisor.housekeeping_interval_ms == 0 {
            anyhow::bail!("Supervisor 'housekeeping_interval_ms' must be greater than zero");
        }

        Ok(())
    }

    pub fn buffer_size(&self) -> Result<usize> {
        parse_size(&self.echo.buffer_size)
            .map(|v| v as usize)
            .context("Invalid echo 'buffer_size'")
    }

    pub fn driver_rx_buffer(&self) -> Result<usize> {
        parse_size(&self.uart.driver_rx_buffer)
            .map(|v| v as usize)
            .context("Invalid UART 'driver_rx_buffer'")
    }

    pub fn task_stack_size(&self) -> Result<usize> {
        parse_size(&self.echo.task_stack_size)
            .map(|v| v as usize)
            .context("Invalid echo 'task_stack_size'")
    }

    /// Full path of the relay file under the mount point.
    pub fn relay_path(&self) -> PathBuf {
        self.storage.base_path.join(&self.storage.relay_file)
    }
}

fn validate_relay_file(relay_file: &str) -> Result<()> {
    if relay_file.trim().is_empty() {
        anyhow::bail!("Storage 'relay_file' cannot be empty");
    }
    let path = Path::new(relay_file);
    let mut names = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => names += 1,
            Component::CurDir => {}
            _ => anyhow::bail!(
                "Storage 'relay_file' must be a plain path below the mount point, got '{}'",
                relay_file
            ),
        }
    }
    if names == 0 {
        anyhow::bail!(
            "Storage 'relay_file' must name a file, not the mount point itself, got '{}'",
            relay_file
        );
    }
    Ok(())
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
