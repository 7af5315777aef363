//! Fixed-capacity, insertion-ordered subscription registry.
//!
//! One container serves both subscription shapes: key-filtered attribute
//! updates and method-named RPC handlers. Entries decide for themselves
//! whether they match an inbound event through [`Matches`]; the two
//! predicates they use are [`KeyFilter`] and [`MethodMatch`].
//!
//! Capacity is fixed at compile time. An insertion that would overflow is
//! rejected before anything is touched, the transport included.

use heapless::Vec;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// An entry that can be tested against an inbound event of type `I`.
pub trait Matches<I: ?Sized> {
    fn matches(&self, input: &I) -> bool;
}

/// Bounded, ordered collection of subscriptions.
pub struct CallbackRegistry<E, const N: usize> {
    entries: Vec<E, N>,
}

impl<E, const N: usize> CallbackRegistry<E, N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Whether `count` more entries fit.
    pub fn has_room_for(&self, count: usize) -> bool {
        self.entries.len() + count <= N
    }

    /// Add `items` atomically.
    ///
    /// Fails with [`Error::CapacityExceeded`] if they do not all fit, then
    /// runs `subscribe` (the transport-side subscription) and fails with its
    /// error. Only when both succeed are the entries appended, in order.
    pub fn subscribe<I>(&mut self, items: I, subscribe: impl FnOnce() -> Result<()>) -> Result<()>
    where
        I: IntoIterator<Item = E>,
        I::IntoIter: ExactSizeIterator,
    {
        let items = items.into_iter();
        if !self.has_room_for(items.len()) {
            warn!(
                "Registry: {} more callbacks exceed capacity {} ({} in use)",
                items.len(),
                N,
                self.entries.len()
            );
            return Err(Error::CapacityExceeded);
        }
        subscribe()?;
        for item in items {
            // Room was checked above.
            let _ = self.entries.push(item);
        }
        Ok(())
    }

    /// Drop every entry, then run `unsubscribe`. Entries are cleared even
    /// when the transport call fails.
    pub fn unsubscribe_all(&mut self, unsubscribe: impl FnOnce() -> Result<()>) -> Result<()> {
        self.entries.clear();
        unsubscribe()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.iter()
    }

    /// Call `f` on every entry matching `input`, in insertion order.
    /// Returns how many matched.
    pub fn for_each_match<I: ?Sized>(&mut self, input: &I, mut f: impl FnMut(&mut E)) -> usize
    where
        E: Matches<I>,
    {
        let mut hits = 0;
        for entry in self.entries.iter_mut() {
            if entry.matches(input) {
                hits += 1;
                f(entry);
            }
        }
        hits
    }

    /// The first entry matching `input`.
    pub fn first_match<I: ?Sized>(&mut self, input: &I) -> Option<&mut E>
    where
        E: Matches<I>,
    {
        self.entries.iter_mut().find(|entry| entry.matches(input))
    }
}

impl<E, const N: usize> Default for CallbackRegistry<E, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Key filter (attribute updates)
// ───────────────────────────────────────────────────────────────

/// Which attribute updates a subscription wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    /// Every update.
    Unfiltered,
    /// Updates containing at least one of these keys.
    Filtered(std::vec::Vec<String>),
}

impl KeyFilter {
    /// Build a filter from a key list. An empty list means unfiltered.
    pub fn from_keys<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        let keys: std::vec::Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            Self::Unfiltered
        } else {
            Self::Filtered(keys)
        }
    }

    /// The first filter key present in `data`, scanning in order.
    ///
    /// `Some("")` stands for an unfiltered match. Empty keys in the list
    /// are skipped.
    pub fn first_hit<'k>(&'k self, data: &Map<String, Value>) -> Option<&'k str> {
        match self {
            Self::Unfiltered => Some(""),
            Self::Filtered(keys) => keys.iter().map(String::as_str).find(|key| {
                if key.is_empty() {
                    warn!("Attribute: empty filter key skipped");
                    return false;
                }
                data.contains_key(*key)
            }),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Method match (RPC)
// ───────────────────────────────────────────────────────────────

/// How a received RPC method name is compared with a registered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodMatch {
    /// Names must be identical.
    Exact,
    /// The received name only has to start with the registered name, so a
    /// registration for `set` also answers `setValue`. This is how the
    /// platform's reference device library behaves.
    Prefix,
}

impl MethodMatch {
    pub fn matches(self, registered: &str, received: &str) -> bool {
        let hit = match self {
            Self::Exact => registered == received,
            Self::Prefix => received.starts_with(registered),
        };
        if hit && registered != received {
            debug!("RPC: '{}' answered by prefix '{}'", received, registered);
        }
        hit
    }
}
