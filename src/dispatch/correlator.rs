//! One-shot request/response correlation.
//!
//! Each outbound shared-attribute request gets a fresh id from a counter
//! owned by the correlator. The id travels in the request topic and comes
//! back in the response topic; the matching handler runs once and is
//! retired. Responses for unknown or retired ids are dropped quietly,
//! since retransmitted duplicates are expected.

use heapless::Vec;
use log::{debug, warn};

use crate::error::{Error, Result};

/// Pending request entry.
struct Pending<H> {
    request_id: u32,
    handler: H,
}

/// Table of outstanding requests, bounded to `N` entries.
pub struct RequestCorrelator<H, const N: usize> {
    last_id: u32,
    pending: Vec<Pending<H>, N>,
}

impl<H, const N: usize> RequestCorrelator<H, N> {
    pub const fn new() -> Self {
        Self::with_seed(0)
    }

    /// Start counting after `last_id`; the first issued id is
    /// `last_id + 1` (wrapping).
    pub const fn with_seed(last_id: u32) -> Self {
        Self {
            last_id,
            pending: Vec::new(),
        }
    }

    /// Store `handler` under a new request id and return the id.
    pub fn issue(&mut self, handler: H) -> Result<u32> {
        if self.pending.is_full() {
            warn!("Request: {} requests already pending", N);
            return Err(Error::CapacityExceeded);
        }
        self.last_id = self.last_id.wrapping_add(1);
        let request_id = self.last_id;
        let _ = self.pending.push(Pending {
            request_id,
            handler,
        });
        Ok(request_id)
    }

    /// Remove and return the handler waiting on `request_id`.
    pub fn take(&mut self, request_id: u32) -> Option<H> {
        let pos = self
            .pending
            .iter()
            .position(|p| p.request_id == request_id)?;
        Some(self.pending.remove(pos).handler)
    }

    /// Hand `request_id`'s handler to `invoke`, then forget it.
    /// Returns `false` if nothing was waiting on that id.
    pub fn resolve(&mut self, request_id: u32, invoke: impl FnOnce(H)) -> bool {
        match self.take(request_id) {
            Some(handler) => {
                debug!("Request: calling callback for response {}", request_id);
                invoke(handler);
                true
            }
            None => {
                debug!("Request: no pending request {}, response dropped", request_id);
                false
            }
        }
    }

    pub fn is_pending(&self, request_id: u32) -> bool {
        self.pending.iter().any(|p| p.request_id == request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every pending request. The id counter keeps running.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<H, const N: usize> Default for RequestCorrelator<H, N> {
    fn default() -> Self {
        Self::new()
    }
}
