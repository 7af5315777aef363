//! Firmware transfer session: the OTA state machine.
//!
//! ```text
//!   Idle ─start─▶ Checking ─▶ Ready ─metadata─▶ Downloading ─▶ Success
//!                               │                  │
//!                               ├─▶ UpToDate       ├─▶ ChecksumError
//!                               ├─▶ NoFirmware     └─▶ Failed
//!                               └─▶ ChecksumUnsupported
//! ```
//!
//! Every terminal state fires the completion callback once and drops the
//! session back to `Idle`; the terminal state is kept as
//! [`FirmwareSession::last_outcome`].
//!
//! The session never waits. Each chunk request arms a deadline; the owner
//! feeds chunks through [`FirmwareSession::on_chunk`] and calls
//! [`FirmwareSession::poll`] so expired deadlines consume the retry budget.

use embassy_time::{Duration, Instant};
use log::{debug, info, warn};
use serde_json::Map;

use super::state::{
    CURRENT_FW_STATE_KEY, CURRENT_FW_TITLE_KEY, CURRENT_FW_VERSION_KEY, FirmwareState,
    FirmwareTarget, Md5Accumulator, SUPPORTED_ALGORITHM, checksum_matches,
};
use crate::config::FirmwareConfig;
use crate::dispatch::AttributeData;
use crate::dispatch::publish::Outbound;
use crate::error::{Error, FirmwareError, Result};
use crate::ports::{FirmwareSink, Transport};
use crate::topics::{FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC, TELEMETRY_TOPIC, firmware_chunk_topic};

/// Completion callback; receives `true` only on a verified, committed image.
pub type DoneCallback = Box<dyn FnOnce(bool)>;

/// Collaborators borrowed for one session step.
pub struct Io<'a, T, S> {
    pub transport: &'a mut T,
    pub sink: &'a mut S,
    pub out: &'a Outbound,
    pub now: Instant,
}

/// Download progress; only present while downloading.
struct Transfer {
    target: FirmwareTarget,
    chunk_count: u32,
    chunk_index: u32,
    bytes_received: usize,
    retries_left: u8,
    checksum: Md5Accumulator,
    sink_open: bool,
    previous_buffer: Option<usize>,
    deadline: Instant,
    /// Cause of the most recent retry, reported if the budget runs out.
    last_failure: FirmwareError,
}

pub struct FirmwareSession {
    config: FirmwareConfig,
    state: FirmwareState,
    registered: bool,
    current_title: String,
    current_version: String,
    transfer: Option<Transfer>,
    on_done: Option<DoneCallback>,
    last_outcome: Option<FirmwareState>,
    last_error: Option<FirmwareError>,
}

impl FirmwareSession {
    pub fn new(config: FirmwareConfig) -> Self {
        Self {
            config,
            state: FirmwareState::Idle,
            registered: false,
            current_title: String::new(),
            current_version: String::new(),
            transfer: None,
            on_done: None,
            last_outcome: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> FirmwareState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Terminal state of the most recent session.
    pub fn last_outcome(&self) -> Option<FirmwareState> {
        self.last_outcome
    }

    /// Failure reason of the most recent session, if it failed.
    pub fn last_error(&self) -> Option<FirmwareError> {
        self.last_error
    }

    pub fn current_title(&self) -> &str {
        &self.current_title
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Deadline of the chunk currently awaited.
    pub fn deadline(&self) -> Option<Instant> {
        self.transfer.as_ref().map(|t| t.deadline)
    }

    /// Index of the chunk currently awaited.
    pub fn awaited_chunk(&self) -> Option<u32> {
        self.transfer.as_ref().map(|t| t.chunk_index)
    }

    /// Register a session for `title`/`version` and report `CHECKING FIRMWARE`.
    ///
    /// The caller subscribes to the firmware attributes next and then calls
    /// [`Self::ready`], or [`Self::abandon`] if that fails.
    pub fn begin<T: Transport, S: FirmwareSink>(
        &mut self,
        io: &mut Io<'_, T, S>,
        title: &str,
        version: &str,
        on_done: DoneCallback,
    ) -> Result<()> {
        if self.registered {
            warn!("OTA: update already in progress");
            return Err(FirmwareError::AlreadyInProgress.into());
        }
        if title.is_empty() || version.is_empty() {
            return Err(Error::InvalidArgument("empty firmware title or version"));
        }
        if self.config.chunk_size == 0 {
            return Err(Error::InvalidArgument("zero chunk size"));
        }

        self.registered = true;
        self.current_title = title.to_owned();
        self.current_version = version.to_owned();
        self.on_done = Some(on_done);
        self.last_outcome = None;
        self.last_error = None;
        info!("OTA: checking for firmware newer than {} {}", title, version);

        self.send_info(io);
        self.enter(io, FirmwareState::Checking);
        Ok(())
    }

    /// Metadata subscription is in place; wait for the target.
    pub fn ready<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        self.enter(io, FirmwareState::Ready);
    }

    /// Give up on a session that could not be set up. The completion
    /// callback is dropped without being called.
    pub fn abandon<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        warn!("OTA: session setup failed");
        send_state(io, FirmwareState::Failed);
        self.on_done = None;
        self.registered = false;
        self.state = FirmwareState::Idle;
        self.last_outcome = Some(FirmwareState::Failed);
    }

    /// Target metadata arrived from the server.
    pub fn on_metadata<T: Transport, S: FirmwareSink>(
        &mut self,
        io: &mut Io<'_, T, S>,
        data: &AttributeData,
    ) {
        if !self.registered || self.state != FirmwareState::Ready {
            debug!("OTA: firmware attributes ignored in state {}", self.state);
            return;
        }
        let Some(target) = FirmwareTarget::from_attributes(data) else {
            info!("OTA: no firmware assigned");
            self.settle(io, FirmwareState::NoFirmware);
            return;
        };
        if target.title == self.current_title && target.version == self.current_version {
            info!("OTA: firmware is already up to date");
            self.settle(io, FirmwareState::UpToDate);
            return;
        }
        if target.title != self.current_title {
            info!("OTA: firmware '{}' is not for this device", target.title);
            self.settle(io, FirmwareState::NoFirmware);
            return;
        }
        if target.algorithm != SUPPORTED_ALGORITHM {
            warn!("OTA: checksum algorithm '{}' is not supported", target.algorithm);
            self.last_error = Some(FirmwareError::UnsupportedAlgorithm);
            self.settle(io, FirmwareState::ChecksumUnsupported);
            return;
        }
        if target.size == 0 {
            info!("OTA: firmware has no size");
            self.settle(io, FirmwareState::NoFirmware);
            return;
        }
        self.start_download(io, target);
    }

    /// A chunk response arrived.
    pub fn on_chunk<T: Transport, S: FirmwareSink>(
        &mut self,
        io: &mut Io<'_, T, S>,
        index: u32,
        payload: &[u8],
    ) {
        let Some(transfer) = self.transfer.as_mut() else {
            debug!("OTA: chunk {} without a download", index);
            return;
        };
        if index != transfer.chunk_index {
            debug!(
                "OTA: chunk {} ignored, waiting for {}",
                index, transfer.chunk_index
            );
            return;
        }

        if transfer.bytes_received + payload.len() > transfer.target.size {
            warn!(
                "OTA: chunk {} overruns image of {} bytes",
                index, transfer.target.size
            );
            self.fail_download(io, FirmwareError::InvalidImage);
            return;
        }
        if !transfer.sink_open {
            if let Err(e) = io.sink.begin(transfer.target.size) {
                warn!("OTA: unable to begin update: {:?}", e);
                self.write_failed(io);
                return;
            }
            transfer.sink_open = true;
        }
        if let Err(e) = io.sink.write(payload) {
            warn!("OTA: unable to write chunk {}: {:?}", index, e);
            self.write_failed(io);
            return;
        }

        transfer.checksum.update(payload);
        transfer.bytes_received += payload.len();
        transfer.chunk_index += 1;
        debug!(
            "OTA: chunk {} written ({}/{} bytes)",
            index, transfer.bytes_received, transfer.target.size
        );

        if transfer.bytes_received == transfer.target.size {
            self.verify(io);
        } else if transfer.chunk_index >= transfer.chunk_count {
            warn!(
                "OTA: image ended at {} of {} bytes",
                transfer.bytes_received, transfer.target.size
            );
            self.fail_download(io, FirmwareError::InvalidImage);
        } else {
            self.request_chunk(io);
        }
    }

    /// Consume a retry if the awaited chunk is overdue.
    pub fn poll<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        if io.now < transfer.deadline {
            return;
        }
        warn!("OTA: timeout waiting for chunk {}", transfer.chunk_index);
        transfer.last_failure = FirmwareError::RetryExhausted;
        self.consume_retry(io);
    }

    /// Listen for chunks again after a reconnect and re-request the
    /// awaited one. No retry is spent.
    pub fn resume<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        let Some(transfer) = self.transfer.as_ref() else {
            return;
        };
        info!("OTA: resuming download at chunk {}", transfer.chunk_index);
        if io
            .out
            .subscribe(io.transport, FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC)
            .is_err()
        {
            self.fail_download(io, FirmwareError::SubscribeFailed);
            return;
        }
        self.request_chunk(io);
    }

    // ── Download ─────────────────────────────────────────────────

    fn start_download<T: Transport, S: FirmwareSink>(
        &mut self,
        io: &mut Io<'_, T, S>,
        target: FirmwareTarget,
    ) {
        info!(
            "OTA: new firmware {} -> {} ({} bytes)",
            self.current_version, target.version, target.size
        );
        let chunk_count = target.chunk_count(self.config.chunk_size);
        self.transfer = Some(Transfer {
            target,
            chunk_count,
            chunk_index: 0,
            bytes_received: 0,
            retries_left: self.config.retry_budget,
            checksum: Md5Accumulator::new(),
            sink_open: false,
            previous_buffer: None,
            deadline: io.now,
            last_failure: FirmwareError::RetryExhausted,
        });

        if io
            .out
            .subscribe(io.transport, FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC)
            .is_err()
        {
            self.fail_download(io, FirmwareError::SubscribeFailed);
            return;
        }

        let needed = self.config.required_buffer_size();
        let previous = io.transport.receive_buffer_size();
        if previous < needed {
            if let Err(e) = io.transport.set_receive_buffer_size(needed) {
                warn!("OTA: not enough memory for a {} byte buffer: {:?}", needed, e);
                self.fail_download(io, FirmwareError::BufferResize);
                return;
            }
            if let Some(transfer) = self.transfer.as_mut() {
                transfer.previous_buffer = Some(previous);
            }
        }

        self.enter(io, FirmwareState::Downloading);
        self.request_chunk(io);
    }

    fn request_chunk<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        let topic = firmware_chunk_topic(transfer.chunk_index);
        let size = self.config.chunk_size.to_string();
        if io.out.send_raw(io.transport, &topic, &size).is_err() {
            warn!("OTA: request for chunk {} not sent", transfer.chunk_index);
        }
        transfer.deadline = io.now + Duration::from_millis(self.config.chunk_timeout_ms);
    }

    fn write_failed<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.last_failure = FirmwareError::WriteError;
        }
        self.last_error = Some(FirmwareError::WriteError);
        send_state(io, FirmwareState::UpdateError);
        self.consume_retry(io);
    }

    /// Spend one retry and ask for the awaited chunk again.
    fn consume_retry<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        transfer.retries_left = transfer.retries_left.saturating_sub(1);
        if transfer.retries_left == 0 {
            warn!("OTA: retries exhausted at chunk {}", transfer.chunk_index);
            let reason = transfer.last_failure;
            self.fail_download(io, reason);
            return;
        }
        debug!("OTA: {} retries left", transfer.retries_left);
        self.request_chunk(io);
    }

    fn verify<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        let checksum = core::mem::take(&mut transfer.checksum);
        let actual = checksum.finish();
        info!("OTA: MD5 actual   {}", actual);
        info!("OTA: MD5 expected {}", transfer.target.checksum);

        if !checksum_matches(&actual, &transfer.target.checksum) {
            warn!("OTA: checksum verification failed");
            io.sink.abort();
            transfer.sink_open = false;
            self.last_error = Some(FirmwareError::ChecksumMismatch);
            self.finish_download(io, FirmwareState::ChecksumError);
            return;
        }

        info!("OTA: checksum verified");
        transfer.sink_open = false;
        if let Err(e) = io.sink.commit() {
            warn!("OTA: unable to commit update: {:?}", e);
            send_state(io, FirmwareState::UpdateError);
            self.last_error = Some(FirmwareError::WriteError);
            self.finish_download(io, FirmwareState::Failed);
            return;
        }
        self.finish_download(io, FirmwareState::Success);
    }

    fn fail_download<T: Transport, S: FirmwareSink>(
        &mut self,
        io: &mut Io<'_, T, S>,
        reason: FirmwareError,
    ) {
        warn!("OTA: download failed: {}", reason);
        self.last_error = Some(reason);
        self.finish_download(io, FirmwareState::Failed);
    }

    /// Release every download resource and report the outcome.
    fn finish_download<T: Transport, S: FirmwareSink>(
        &mut self,
        io: &mut Io<'_, T, S>,
        outcome: FirmwareState,
    ) {
        let Some(transfer) = self.transfer.take() else {
            return;
        };
        if transfer.sink_open {
            io.sink.abort();
        }
        if let Some(previous) = transfer.previous_buffer {
            if let Err(e) = io.transport.set_receive_buffer_size(previous) {
                warn!("OTA: unable to restore buffer size {}: {:?}", previous, e);
            }
        }
        let _ = io
            .out
            .unsubscribe(io.transport, FIRMWARE_RESPONSE_SUBSCRIBE_TOPIC);

        if outcome == FirmwareState::ChecksumError {
            send_state(io, FirmwareState::ChecksumError);
        }
        if outcome == FirmwareState::Success {
            self.current_title = transfer.target.title;
            self.current_version = transfer.target.version;
            self.send_info(io);
            send_state(io, FirmwareState::Success);
        } else {
            send_state(io, FirmwareState::Failed);
        }
        self.conclude(outcome);
    }

    // ── Reporting ────────────────────────────────────────────────

    fn enter<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>, state: FirmwareState) {
        self.state = state;
        send_state(io, state);
    }

    /// End a session before any download started, reporting `outcome`.
    fn settle<T: Transport, S: FirmwareSink>(&mut self, io: &mut Io<'_, T, S>, outcome: FirmwareState) {
        send_state(io, outcome);
        self.conclude(outcome);
    }

    fn conclude(&mut self, outcome: FirmwareState) {
        info!("OTA: session finished: {}", outcome);
        self.state = FirmwareState::Idle;
        self.registered = false;
        self.last_outcome = Some(outcome);
        if let Some(on_done) = self.on_done.take() {
            on_done(outcome == FirmwareState::Success);
        }
    }

    fn send_info<T: Transport, S: FirmwareSink>(&self, io: &mut Io<'_, T, S>) {
        let mut body = Map::new();
        body.insert(CURRENT_FW_TITLE_KEY.into(), self.current_title.as_str().into());
        body.insert(CURRENT_FW_VERSION_KEY.into(), self.current_version.as_str().into());
        if io.out.send_object(io.transport, TELEMETRY_TOPIC, &body).is_err() {
            warn!("OTA: current firmware info not sent");
        }
    }
}

fn send_state<T: Transport, S: FirmwareSink>(io: &mut Io<'_, T, S>, state: FirmwareState) {
    if state == FirmwareState::Idle {
        return;
    }
    let mut body = Map::new();
    body.insert(CURRENT_FW_STATE_KEY.into(), state.as_str().into());
    if io.out.send_object(io.transport, TELEMETRY_TOPIC, &body).is_err() {
        warn!("OTA: state {} not sent", state);
    }
}
