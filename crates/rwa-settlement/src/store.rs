//! Order store: read-side snapshot of every order.
//!
//! The snapshot is immutable and replaced wholesale by `refresh()`; readers
//! hold an `Arc` to the version they loaded and are never affected by a
//! later refresh. A failed refresh keeps the previous snapshot and sets the
//! error flag. Refreshes are ticketed, so a slow refresh that finishes after
//! a newer one cannot roll the snapshot back.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rwa_core::{Address, Order, OrderStatus};
use rwa_ledger::DynLedgerRpc;
use rwa_telemetry::Metrics;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{DeskError, DeskResult};

/// One immutable view of all orders.
#[derive(Debug, Clone, Default)]
pub struct OrderSnapshot {
    orders: Vec<Order>,
    fetched_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl OrderSnapshot {
    /// Snapshot over `orders`, sorted by creation timestamp.
    #[must_use]
    pub fn new(mut orders: Vec<Order>, fetched_at: DateTime<Utc>, generation: u64) -> Self {
        orders.sort_by_key(|o| o.created_at);
        Self {
            orders,
            fetched_at: Some(fetched_at),
            generation,
        }
    }

    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// `None` until the first successful refresh.
    #[must_use]
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn get(&self, address: &Address) -> Option<&Order> {
        self.orders.iter().find(|o| o.address == *address)
    }

    pub fn by_status(&self, status: OrderStatus) -> impl Iterator<Item = &Order> + '_ {
        self.orders.iter().filter(move |o| o.status == status)
    }

    pub fn by_requester<'a>(&'a self, requester: &'a Address) -> impl Iterator<Item = &'a Order> + 'a {
        self.orders.iter().filter(move |o| o.requester == *requester)
    }

    /// Count per status, in `OrderStatus::ALL` order.
    #[must_use]
    pub fn status_counts(&self) -> Vec<(OrderStatus, usize)> {
        OrderStatus::ALL
            .iter()
            .map(|s| (*s, self.by_status(*s).count()))
            .collect()
    }
}

/// Decrements the loading counter on drop.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct OrderStore {
    rpc: DynLedgerRpc,
    program: Address,
    snapshot: RwLock<Arc<OrderSnapshot>>,
    /// Last issued refresh ticket.
    tickets: AtomicU64,
    /// Refreshes currently running.
    loading: AtomicUsize,
    last_error: RwLock<Option<String>>,
}

impl OrderStore {
    #[must_use]
    pub fn new(rpc: DynLedgerRpc, program: Address) -> Self {
        Self {
            rpc,
            program,
            snapshot: RwLock::new(Arc::new(OrderSnapshot::default())),
            tickets: AtomicU64::new(0),
            loading: AtomicUsize::new(0),
            last_error: RwLock::new(None),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<OrderSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Orders with `status` in the current snapshot. No network call.
    #[must_use]
    pub fn get_by_status(&self, status: OrderStatus) -> Vec<Order> {
        self.snapshot().by_status(status).cloned().collect()
    }

    /// Orders created by `requester` in the current snapshot. No network call.
    #[must_use]
    pub fn get_by_requester(&self, requester: &Address) -> Vec<Order> {
        self.snapshot().by_requester(requester).cloned().collect()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire) > 0
    }

    /// Message of the last failed refresh, cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Bulk-fetch every order and install a new snapshot.
    ///
    /// Returns the number of orders in the installed snapshot.
    pub async fn refresh(&self) -> DeskResult<usize> {
        let ticket = self.tickets.fetch_add(1, Ordering::AcqRel) + 1;
        self.loading.fetch_add(1, Ordering::AcqRel);
        let _loading = LoadingGuard(&self.loading);

        match self.rpc.list_orders(&self.program).await {
            Ok(orders) => {
                let mut slot = self.snapshot.write();
                if slot.generation() > ticket {
                    Metrics::order_store_refresh("stale", None);
                    debug!(ticket, installed = slot.generation(), "Discarding stale refresh");
                    return Ok(slot.len());
                }
                let next = OrderSnapshot::new(orders, Utc::now(), ticket);
                let count = next.len();
                *slot = Arc::new(next);
                drop(slot);

                *self.last_error.write() = None;
                Metrics::order_store_refresh("ok", Some(count));
                debug!(ticket, orders = count, "Order store refreshed");
                Ok(count)
            }
            Err(e) => {
                Metrics::order_store_refresh("failed", None);
                warn!(ticket, error = %e, "Order store refresh failed, keeping previous snapshot");
                if self.snapshot.read().generation() < ticket {
                    *self.last_error.write() = Some(e.to_string());
                }
                Err(DeskError::Query(e))
            }
        }
    }

    /// Refresh in the background.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are recorded in `last_error` and logged by `refresh`.
            let _ = store.refresh().await;
        })
    }
}
