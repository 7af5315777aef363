//! Firmware update states, target metadata and checksum accumulation.

use core::fmt;

use serde_json::Value;

use crate::dispatch::AttributeData;

pub const FW_CHECKSUM_KEY: &str = "fw_checksum";
pub const FW_CHECKSUM_ALGORITHM_KEY: &str = "fw_checksum_algorithm";
pub const FW_SIZE_KEY: &str = "fw_size";
pub const FW_TITLE_KEY: &str = "fw_title";
pub const FW_VERSION_KEY: &str = "fw_version";

/// The shared attributes describing the firmware the server offers.
pub const FW_METADATA_KEYS: [&str; 5] = [
    FW_CHECKSUM_KEY,
    FW_CHECKSUM_ALGORITHM_KEY,
    FW_SIZE_KEY,
    FW_TITLE_KEY,
    FW_VERSION_KEY,
];

pub const CURRENT_FW_TITLE_KEY: &str = "current_fw_title";
pub const CURRENT_FW_VERSION_KEY: &str = "current_fw_version";
pub const CURRENT_FW_STATE_KEY: &str = "current_fw_state";

/// The only checksum algorithm images can be verified with.
pub const SUPPORTED_ALGORITHM: &str = "MD5";

/// Where a firmware session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareState {
    /// No session registered. Local only: the platform has no such
    /// `current_fw_state`, so it is never reported.
    Idle,
    Checking,
    /// Registered, waiting for target metadata.
    Ready,
    NoFirmware,
    UpToDate,
    ChecksumUnsupported,
    Downloading,
    /// A chunk could not be written; the transfer retries.
    UpdateError,
    ChecksumError,
    Success,
    Failed,
}

impl FirmwareState {
    /// Value reported as `current_fw_state`. `IDLE` only shows up in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Checking => "CHECKING FIRMWARE",
            Self::Ready => "READY",
            Self::NoFirmware => "NO FIRMWARE FOUND",
            Self::UpToDate => "UP TO DATE",
            Self::ChecksumUnsupported => "CHKS IS NOT MD5",
            Self::Downloading => "DOWNLOADING",
            Self::UpdateError => "UPDATE ERROR",
            Self::ChecksumError => "CHECKSUM ERROR",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// States a session ends in.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NoFirmware
                | Self::UpToDate
                | Self::ChecksumUnsupported
                | Self::ChecksumError
                | Self::Success
                | Self::Failed
        )
    }
}

impl fmt::Display for FirmwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Firmware advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTarget {
    pub title: String,
    pub version: String,
    pub checksum: String,
    pub algorithm: String,
    pub size: usize,
}

impl FirmwareTarget {
    /// Read the target from firmware shared attributes. `None` when the
    /// title or version is missing.
    pub fn from_attributes(data: &AttributeData) -> Option<Self> {
        let title = data.get(FW_TITLE_KEY)?.as_str()?;
        let version = data.get(FW_VERSION_KEY)?.as_str()?;
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let size = data
            .get(FW_SIZE_KEY)
            .and_then(Value::as_u64)
            .and_then(|s| usize::try_from(s).ok())
            .unwrap_or(0);
        Some(Self {
            title: title.to_owned(),
            version: version.to_owned(),
            checksum: text(FW_CHECKSUM_KEY),
            algorithm: text(FW_CHECKSUM_ALGORITHM_KEY),
            size,
        })
    }

    pub fn chunk_count(&self, chunk_size: usize) -> u32 {
        u32::try_from(self.size.div_ceil(chunk_size)).unwrap_or(u32::MAX)
    }
}

/// Running MD5 over the received image.
pub struct Md5Accumulator {
    context: md5::Context,
}

impl Md5Accumulator {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    /// Lowercase hex digest.
    pub fn finish(self) -> String {
        format!("{:x}", self.context.compute())
    }
}

impl Default for Md5Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-sensitive compare of `actual` with the same-length prefix of
/// `expected`.
pub fn checksum_matches(actual: &str, expected: &str) -> bool {
    expected.get(..actual.len()) == Some(actual)
}
