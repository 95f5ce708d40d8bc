//! JSON-file-backed order catalog.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::order::{AdjustmentState, Order, OrderSnapshot, StateChange};
use crate::persist::{read_json, write_json};

use super::{CatalogError, MergeOutcome, OrderCatalog, OrderFilter, Transition};

/// Order catalog stored as one pretty-printed JSON object keyed by order ID.
///
/// The whole map is rewritten atomically after every mutation, and the
/// in-memory copy is only updated once the write has landed, so memory and
/// disk never disagree.
pub struct JsonOrderCatalog {
    path: PathBuf,
    orders: Mutex<BTreeMap<String, Order>>,
}

impl JsonOrderCatalog {
    /// Open the catalog at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let orders: BTreeMap<String, Order> = read_json(path)?.unwrap_or_default();
        debug!("Loaded {} orders from {}", orders.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            orders: Mutex::new(orders),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Order>> {
        self.orders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write `updated` to disk, then install it as the in-memory state.
    fn commit(
        &self,
        guard: &mut MutexGuard<'_, BTreeMap<String, Order>>,
        updated: BTreeMap<String, Order>,
    ) -> Result<(), CatalogError> {
        write_json(&self.path, &updated, "order catalog")?;
        **guard = updated;
        Ok(())
    }
}

impl OrderCatalog for JsonOrderCatalog {
    fn get(&self, id: &str) -> Result<Option<Order>, CatalogError> {
        Ok(self.lock().get(id).cloned())
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, CatalogError> {
        let mut orders: Vec<Order> = self
            .lock()
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();

        orders.sort_by(|a, b| {
            a.purchase_date
                .cmp(&b.purchase_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        if filter.limit > 0 {
            orders.truncate(filter.limit);
        }
        Ok(orders)
    }

    fn count(&self, filter: &OrderFilter) -> Result<usize, CatalogError> {
        Ok(self.lock().values().filter(|o| filter.matches(o)).count())
    }

    fn reload(&self) -> Result<(), CatalogError> {
        let orders: BTreeMap<String, Order> = read_json(&self.path)?.unwrap_or_default();
        let mut guard = self.lock();
        if *guard != orders {
            debug!(
                "Catalog changed on disk: {} -> {} orders",
                guard.len(),
                orders.len()
            );
        }
        *guard = orders;
        Ok(())
    }

    fn merge_snapshot(
        &self,
        snapshot: OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, CatalogError> {
        let mut guard = self.lock();

        let Some(existing) = guard.get(&snapshot.id) else {
            let mut updated = guard.clone();
            updated.insert(snapshot.id.clone(), Order::from_snapshot(snapshot, now));
            self.commit(&mut guard, updated)?;
            return Ok(MergeOutcome::Created);
        };

        if existing.is_terminal() {
            return Ok(MergeOutcome::Frozen);
        }

        let mut order = existing.clone();
        order.current_price = snapshot.current_price;
        if snapshot.tracking_ref.is_some() {
            order.tracking_ref = snapshot.tracking_ref;
        }
        if snapshot.item_count.is_some() {
            order.item_count = snapshot.item_count;
        }

        if order == *existing {
            return Ok(MergeOutcome::Unchanged);
        }

        order.updated_at = now;
        let mut updated = guard.clone();
        updated.insert(order.id.clone(), order);
        self.commit(&mut guard, updated)?;
        Ok(MergeOutcome::Refreshed)
    }

    fn transition(
        &self,
        id: &str,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Order, CatalogError> {
        let mut guard = self.lock();
        let existing = guard
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        let from = existing.adjustment_state;

        if from == transition.to
            && existing.reason == transition.reason
            && transition.to != AdjustmentState::Attempted
        {
            return Ok(existing.clone());
        }

        let changes_state = from != transition.to || transition.to == AdjustmentState::Attempted;
        if from.is_terminal() || (changes_state && !from.can_transition_to(transition.to)) {
            return Err(CatalogError::InvalidTransition {
                order_id: id.to_string(),
                from,
                to: transition.to,
            });
        }

        let mut order = existing.clone();
        if transition.to == AdjustmentState::Attempted {
            order.attempt_count += 1;
            order.last_attempt_at = Some(now);
        }
        if transition.refund_amount.is_some() {
            order.refund_amount = transition.refund_amount;
        }
        if transition.tracking_ref.is_some() {
            order.tracking_ref = transition.tracking_ref;
        }
        if from != transition.to {
            order.history.push(StateChange {
                state: transition.to,
                at: now,
                reason: transition.reason.clone(),
            });
        }
        order.adjustment_state = transition.to;
        order.reason = transition.reason;
        order.updated_at = now;

        let mut updated = guard.clone();
        updated.insert(order.id.clone(), order.clone());
        self.commit(&mut guard, updated)?;

        debug!("Order {}: {} -> {}", id, from, order.adjustment_state);
        Ok(order)
    }
}
