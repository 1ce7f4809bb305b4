//! The record of every iteration of the coupling loop.
use super::demand::{DemandKey, DemandTable};
use super::prices::{PriceKey, PriceTable};
use crate::units::{Dimensionless, Flow, MoneyPerFlow};
use std::collections::BTreeMap;

/// The outcome of one iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// Iteration index, starting at zero
    pub iteration: u32,
    /// Prices from the core model solution at the end of the iteration
    pub prices: PriceTable,
    /// The demand applied to the core model in this iteration
    pub demand: DemandTable,
    /// Mean deviation of prices from those which drove the simulators
    pub price_deviation: Dimensionless,
    /// Mean deviation of demand from the previous iteration, if there was one
    pub demand_deviation: Option<Dimensionless>,
    /// Whether the price deviation barely changed from the previous iteration
    pub oscillating: bool,
    /// Whether the demand was averaged over the last two iterations after failing to converge
    pub damped: bool,
}

/// A wide table with one column per iteration. Missing values are `None`.
pub type WideTable<K, V> = BTreeMap<K, Vec<Option<V>>>;

/// An ordered, append-only history of iterations
#[derive(Debug, Default)]
pub struct HistoryRecorder {
    records: Vec<IterationRecord>,
}

impl HistoryRecorder {
    /// Append a record
    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    /// All records, oldest first
    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// The most recent record
    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// The record before the most recent one
    pub fn second_last(&self) -> Option<&IterationRecord> {
        self.records.iter().nth_back(1)
    }

    /// The number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether there are no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Prices of every iteration, one column per record
    pub fn price_table(&self) -> WideTable<PriceKey, MoneyPerFlow> {
        widen(self.records.iter().map(|record| {
            record
                .prices
                .iter()
                .map(|(key, value)| (key.clone(), *value))
        }))
    }

    /// Demand of every iteration, one column per record, with the unit of the latest value
    pub fn demand_table(&self) -> WideTable<DemandKey, (Flow, String)> {
        widen(self.records.iter().map(|record| {
            record
                .demand
                .iter()
                .map(|(key, entry)| (key.clone(), (entry.value, entry.unit.clone())))
        }))
    }
}

/// Arrange per-iteration values into one row per key
fn widen<K, V, I, J>(columns: I) -> WideTable<K, V>
where
    K: Ord,
    I: ExactSizeIterator<Item = J>,
    J: Iterator<Item = (K, V)>,
{
    let num_columns = columns.len();
    let mut table: WideTable<K, V> = BTreeMap::new();
    for (idx, column) in columns.enumerate() {
        for (key, value) in column {
            table
                .entry(key)
                .or_insert_with(|| std::iter::repeat_with(|| None).take(num_columns).collect())
                [idx] = Some(value);
        }
    }

    table
}
