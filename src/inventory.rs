use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::allocator::{self, Allocation, BillCount, Denomination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub u32);

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Machine {machine} holds {available} bills of {denomination}, {requested} requested")]
    Oversubscribed {
        machine: MachineId,
        denomination: Denomination,
        requested: BillCount,
        available: BillCount,
    },
    #[error("Machine {machine} does not dispense bills of {denomination}")]
    UnknownDenomination {
        machine: MachineId,
        denomination: Denomination,
    },
}

/// Point-in-time copy of a machine's bill counts, largest denomination first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineState {
    pub machine_id: MachineId,
    pub bills: Vec<(Denomination, BillCount)>,
}

impl MachineState {
    pub fn count(&self, denomination: Denomination) -> Option<BillCount> {
        self.bills
            .iter()
            .find(|(d, _)| *d == denomination)
            .map(|(_, c)| *c)
    }
}

/// Bills physically loaded into one machine.
#[derive(Debug)]
pub struct Inventory {
    machine_id: MachineId,
    bills: Mutex<Vec<(Denomination, BillCount)>>,
}

impl Inventory {
    /// Stacks are kept largest denomination first; repeated denominations are merged.
    pub fn new(
        machine_id: MachineId,
        bills: impl IntoIterator<Item = (Denomination, BillCount)>,
    ) -> Self {
        let mut merged: Vec<(Denomination, BillCount)> = Vec::new();
        for (denomination, count) in bills {
            match merged.iter_mut().find(|(d, _)| *d == denomination) {
                Some((_, existing)) => *existing = existing.saturating_add(count),
                None => merged.push((denomination, count)),
            }
        }
        merged.sort_by(|a, b| b.0.cmp(&a.0));
        Self {
            machine_id,
            bills: Mutex::new(merged),
        }
    }

    pub fn machine_id(&self) -> MachineId {
        self.machine_id
    }

    pub fn snapshot(&self) -> MachineState {
        self.lock().snapshot()
    }

    /// Takes the allocated bills out of the machine, or nothing at all if any
    /// stack cannot cover its part.
    pub fn reserve(&self, allocation: &Allocation) -> Result<(), InventoryError> {
        self.lock().reserve(allocation)
    }

    /// Exclusive access to the counts, for running allocate-then-reserve as
    /// one critical section.
    pub fn lock(&self) -> InventoryGuard<'_> {
        InventoryGuard {
            machine_id: self.machine_id,
            // reserve and release validate before mutating, so a poisoned
            // guard still holds consistent counts
            bills: self.bills.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

pub struct InventoryGuard<'a> {
    machine_id: MachineId,
    bills: MutexGuard<'a, Vec<(Denomination, BillCount)>>,
}

impl InventoryGuard<'_> {
    pub fn bills(&self) -> &[(Denomination, BillCount)] {
        &self.bills
    }

    pub fn snapshot(&self) -> MachineState {
        MachineState {
            machine_id: self.machine_id,
            bills: self.bills.clone(),
        }
    }

    /// Fewest-bills allocation from the bills currently in the machine.
    pub fn allocate(&self, amount: u64) -> Option<Allocation> {
        allocator::allocate(amount, &self.bills)
    }

    pub fn reserve(&mut self, allocation: &Allocation) -> Result<(), InventoryError> {
        let mut next = self.bills.clone();
        for &(denomination, requested) in allocation.bills() {
            if requested == 0 {
                continue;
            }
            let Some((_, available)) = next.iter_mut().find(|(d, _)| *d == denomination) else {
                return Err(InventoryError::UnknownDenomination {
                    machine: self.machine_id,
                    denomination,
                });
            };
            *available = available.checked_sub(requested).ok_or(
                InventoryError::Oversubscribed {
                    machine: self.machine_id,
                    denomination,
                    requested,
                    available: *available,
                },
            )?;
        }
        *self.bills = next;
        debug!(machine = %self.machine_id, bills = ?*self.bills, "bills reserved");
        Ok(())
    }

    /// Puts back bills taken by [`InventoryGuard::reserve`].
    pub fn release(&mut self, allocation: &Allocation) {
        for (denomination, count) in allocation.dispensed() {
            if let Some((_, available)) = self.bills.iter_mut().find(|(d, _)| *d == denomination) {
                *available = available.saturating_add(count);
            }
        }
        debug!(machine = %self.machine_id, bills = ?*self.bills, "bills released");
    }
}
