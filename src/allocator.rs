use serde::Serialize;

pub type Denomination = u64;
pub type BillCount = u32;

const UNREACHABLE: u32 = u32::MAX;

/// Bills picked for a single withdrawal, one entry per bill stack the
/// allocation was computed from, in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    bills: Vec<(Denomination, BillCount)>,
}

impl Allocation {
    fn empty(available: &[(Denomination, BillCount)]) -> Self {
        Self {
            bills: available.iter().map(|(d, _)| (*d, 0)).collect(),
        }
    }

    pub fn bills(&self) -> &[(Denomination, BillCount)] {
        &self.bills
    }

    /// Number of bills of `denomination`, zero if it is not part of the allocation.
    pub fn count(&self, denomination: Denomination) -> BillCount {
        self.bills
            .iter()
            .filter(|(d, _)| *d == denomination)
            .map(|(_, c)| *c)
            .sum()
    }

    pub fn total_bills(&self) -> u64 {
        self.bills.iter().map(|(_, c)| u64::from(*c)).sum()
    }

    pub fn value(&self) -> u64 {
        self.bills.iter().map(|(d, c)| d * u64::from(*c)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bills.iter().all(|(_, c)| *c == 0)
    }

    /// Non-zero entries only, e.g. for printing a receipt.
    pub fn dispensed(&self) -> impl Iterator<Item = (Denomination, BillCount)> + '_ {
        self.bills.iter().copied().filter(|(_, c)| *c > 0)
    }
}

/// Finds the allocation with the fewest bills that sums exactly to `amount`,
/// using at most the available count of every stack.
///
/// Returns `None` when no exact combination exists. `amount == 0` always
/// yields the all-zero allocation.
///
/// Bills are processed stack by stack in ascending denomination order, keeping
/// one `min_bills` row per stack. Reconstruction then walks the rows back from
/// the largest denomination, taking as many bills of each as still lead to an
/// optimal total, so ties between equally short combinations favour larger
/// bills and no stack is ever drawn beyond its supply.
pub fn allocate(amount: u64, available: &[(Denomination, BillCount)]) -> Option<Allocation> {
    let mut allocation = Allocation::empty(available);
    if amount == 0 {
        return Some(allocation);
    }

    let dispensable: u64 = available
        .iter()
        .map(|(d, c)| d.saturating_mul(u64::from(*c)))
        .fold(0, u64::saturating_add);
    if amount > dispensable {
        return None;
    }
    let target = usize::try_from(amount).ok()?;

    // stack indices able to contribute, smallest denomination first
    let mut order: Vec<usize> = (0..available.len())
        .filter(|&i| {
            let (denomination, count) = available[i];
            denomination > 0 && denomination <= amount && count > 0
        })
        .collect();
    order.sort_by_key(|&i| available[i].0);

    let mut min_bills = vec![UNREACHABLE; target + 1];
    min_bills[0] = 0;
    let mut rows = Vec::with_capacity(order.len() + 1);
    rows.push(min_bills.clone());

    for &i in &order {
        let (denomination, count) = available[i];
        let step = denomination as usize;
        let previous = rows[rows.len() - 1].clone();
        for sum in step..=target {
            let most = usable(sum, step, count);
            for used in 1..=most {
                let rest = sum - step * used as usize;
                if previous[rest] != UNREACHABLE {
                    min_bills[sum] = min_bills[sum].min(previous[rest].saturating_add(used));
                }
            }
        }
        rows.push(min_bills.clone());
    }

    if min_bills[target] == UNREACHABLE {
        return None;
    }

    let mut remaining = target;
    for (row, &i) in order.iter().enumerate().rev() {
        let (denomination, count) = available[i];
        let step = denomination as usize;
        let best = rows[row + 1][remaining];
        let before = &rows[row];
        let taken = (0..=usable(remaining, step, count)).rev().find(|&used| {
            let rest = remaining - step * used as usize;
            before[rest] != UNREACHABLE && before[rest].saturating_add(used) == best
        })?;
        allocation.bills[i].1 = taken;
        remaining -= step * taken as usize;
    }

    debug_assert_eq!(remaining, 0);
    debug_assert_eq!(allocation.value(), amount);
    Some(allocation)
}

/// How many bills of `step` fit into `sum` without exceeding `count`.
fn usable(sum: usize, step: usize, count: BillCount) -> BillCount {
    BillCount::try_from(sum / step).map_or(count, |fit| fit.min(count))
}
