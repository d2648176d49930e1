//! Order address derivation.
//!
//! An order address is a pure function of `(asset, requester, created_at)`.
//! Wall-clock milliseconds are too coarse to keep two orders from the same
//! requester apart, so `created_at` is composed from
//!
//! - milliseconds since the Unix epoch,
//! - sub-millisecond microseconds from a monotonic clock,
//! - a random suffix in `0..1000`,
//!
//! as `ms * 1_000_000 + micros * 1_000 + suffix`, range-checked against the
//! ledger's signed 64-bit field. Issued values are additionally forced to be
//! strictly increasing per generator, so two derivations in one process can
//! never share a timestamp.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use rand::Rng;
use rwa_core::{Address, AssetId, OrderTimestamp};

use crate::error::{LedgerError, LedgerResult};
use crate::pda;

/// Random suffix range (exclusive).
pub const JITTER_RANGE: u32 = 1_000;

/// Source of time components, injectable for tests.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Sub-millisecond microseconds in `0..1000` from a monotonic clock.
    fn sub_ms_micros(&self) -> u32;

    /// Random suffix in `0..JITTER_RANGE`.
    fn jitter(&self) -> u32 {
        rand::thread_rng().gen_range(0..JITTER_RANGE)
    }
}

/// System time source: wall clock for milliseconds, `Instant` for sub-ms ticks.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }

    fn sub_ms_micros(&self) -> u32 {
        self.origin.elapsed().subsec_micros() % 1_000
    }
}

/// Compose a timestamp from its parts, failing if it exceeds `i64::MAX`.
pub fn compose_timestamp(ms: u64, sub_ms_micros: u32, jitter: u32) -> LedgerResult<i64> {
    if sub_ms_micros >= 1_000 || jitter >= JITTER_RANGE {
        return Err(LedgerError::AddressRange(format!(
            "component out of range: micros={sub_ms_micros} jitter={jitter}"
        )));
    }
    let composed = (ms as u128) * 1_000_000 + (sub_ms_micros as u128) * 1_000 + jitter as u128;
    i64::try_from(composed)
        .map_err(|_| LedgerError::AddressRange(format!("{composed} exceeds i64::MAX (ms={ms})")))
}

/// Issues strictly increasing order timestamps.
pub struct OrderTimestampGenerator<T: TimeSource> {
    /// Last issued value.
    last: AtomicI64,
    source: T,
}

impl<T: TimeSource> OrderTimestampGenerator<T> {
    #[must_use]
    pub fn new(source: T) -> Self {
        Self {
            last: AtomicI64::new(i64::MIN),
            source,
        }
    }

    /// Next timestamp: `max(last + 1, composed)`.
    ///
    /// Thread-safe via CAS loop.
    pub fn next(&self) -> LedgerResult<OrderTimestamp> {
        let composed = compose_timestamp(
            self.source.now_ms(),
            self.source.sub_ms_micros(),
            self.source.jitter(),
        )?;

        loop {
            let current = self.last.load(Ordering::Acquire);
            let bumped = if current == i64::MIN {
                composed
            } else {
                current
                    .checked_add(1)
                    .ok_or_else(|| LedgerError::AddressRange("timestamp counter exhausted".into()))?
                    .max(composed)
            };

            match self
                .last
                .compare_exchange_weak(current, bumped, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(OrderTimestamp::new(bumped)),
                Err(_) => continue,
            }
        }
    }
}

/// Derives fresh order addresses under the order program.
pub struct AddressDeriver<T: TimeSource> {
    program: Address,
    timestamps: OrderTimestampGenerator<T>,
}

impl<T: TimeSource> AddressDeriver<T> {
    #[must_use]
    pub fn new(program: Address, source: T) -> Self {
        Self {
            program,
            timestamps: OrderTimestampGenerator::new(source),
        }
    }

    /// Issue a new timestamp and derive the order address for it.
    ///
    /// No network round-trip; a range failure is reported before anything
    /// is submitted.
    pub fn derive(&self, asset: &AssetId, requester: &Address) -> LedgerResult<(Address, OrderTimestamp)> {
        let created_at = self.timestamps.next()?;
        let address = pda::order_address(&self.program, asset, requester, created_at)?;
        Ok((address, created_at))
    }

    /// Address for a known timestamp (pure).
    pub fn address_for(
        &self,
        asset: &AssetId,
        requester: &Address,
        created_at: OrderTimestamp,
    ) -> LedgerResult<Address> {
        pda::order_address(&self.program, asset, requester, created_at)
    }

    #[must_use]
    pub fn program(&self) -> &Address {
        &self.program
    }
}

impl AddressDeriver<SystemTimeSource> {
    /// Deriver over the system clock.
    #[must_use]
    pub fn with_system_clock(program: Address) -> Self {
        Self::new(program, SystemTimeSource::new())
    }
}
