//! Async driver for a firmware session.
//!
//! The session itself never blocks. This loop is the suspend point: it
//! services the transport, expires deadlines and then sleeps until either
//! the next poll or the chunk deadline, whichever comes first.

use embassy_time::Duration;
use log::debug;

use crate::dispatch::Client;
use crate::ota::state::FirmwareState;
use crate::ports::{Clock, FirmwareSink, Transport};

/// Something that can suspend the driver for a while.
#[allow(async_fn_in_trait)]
pub trait Sleeper {
    async fn sleep(&mut self, duration: Duration);
}

/// Drive `client` until no firmware session is registered, then return
/// the session's terminal state.
pub async fn run_until_idle<T, S, C, Z, const N: usize>(
    client: &mut Client<T, S, C, N>,
    sleeper: &mut Z,
    poll_interval: Duration,
) -> Option<FirmwareState>
where
    T: Transport,
    S: FirmwareSink,
    C: Clock,
    Z: Sleeper,
{
    loop {
        client.pump();
        client.tick();
        if !client.firmware_active() {
            break;
        }
        let wait = match client.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(client.now())
                .min(poll_interval),
            None => poll_interval,
        };
        sleeper.sleep(wait).await;
    }
    debug!("OTA: driver idle");
    client.firmware_outcome()
}
