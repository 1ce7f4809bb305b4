//! Extracting the price signal passed to the demand simulators.
use crate::commodity::CommodityID;
use crate::core_model::ModelSolution;
use crate::region::RegionID;
use crate::units::MoneyPerFlow;
use serde::Serialize;
use std::collections::{BTreeMap, btree_map};

/// Identifies a price in a [`PriceTable`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceKey {
    /// The region
    pub region_id: RegionID,
    /// The priced commodity
    pub commodity_id: CommodityID,
    /// The model period
    pub period: u32,
}

/// A row of a price table, as written to file
#[derive(Debug, Serialize)]
pub struct PriceRecord<'a> {
    region_id: &'a RegionID,
    commodity_id: &'a CommodityID,
    period: u32,
    value: MoneyPerFlow,
}

/// Commodity prices, with at most one value per (region, commodity, period)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable(BTreeMap<PriceKey, MoneyPerFlow>);

impl PriceTable {
    /// Get the price for the given key
    pub fn get(&self, key: &PriceKey) -> Option<MoneyPerFlow> {
        self.0.get(key).copied()
    }

    /// Iterate over prices in (region, commodity, period) order
    pub fn iter(&self) -> btree_map::Iter<'_, PriceKey, MoneyPerFlow> {
        self.0.iter()
    }

    /// Iterate over the keys in order
    pub fn keys(&self) -> btree_map::Keys<'_, PriceKey, MoneyPerFlow> {
        self.0.keys()
    }

    /// The number of prices
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no prices
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the prices as serialisable records
    pub fn records(&self) -> impl Iterator<Item = PriceRecord<'_>> {
        self.0.iter().map(|(key, value)| PriceRecord {
            region_id: &key.region_id,
            commodity_id: &key.commodity_id,
            period: key.period,
            value: *value,
        })
    }
}

impl FromIterator<(PriceKey, MoneyPerFlow)> for PriceTable {
    fn from_iter<I: IntoIterator<Item = (PriceKey, MoneyPerFlow)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Extract the price signal from a core model solution.
///
/// Only prices for `allowed_commodities` are kept, and regions whose IDs end with
/// `excluded_region_suffix` are dropped. Where the solution has several prices for the same
/// region, commodity and period (e.g. at different levels or times), their mean is used.
///
/// # Arguments
///
/// * `solution` - A solution of the core model (or its reference solution)
/// * `allowed_commodities` - The commodities to extract prices for
/// * `excluded_region_suffix` - Suffix marking global regions
pub fn extract_prices(
    solution: &ModelSolution,
    allowed_commodities: &[CommodityID],
    excluded_region_suffix: &str,
) -> PriceTable {
    let mut sums: BTreeMap<PriceKey, (f64, f64)> = BTreeMap::new();
    for row in &solution.prices {
        if !allowed_commodities.contains(&row.commodity_id)
            || row.region_id.is_global(excluded_region_suffix)
        {
            continue;
        }

        let key = PriceKey {
            region_id: row.region_id.clone(),
            commodity_id: row.commodity_id.clone(),
            period: row.period,
        };
        let (sum, count) = sums.entry(key).or_default();
        *sum += row.value.value();
        *count += 1.0;
    }

    sums.into_iter()
        .map(|(key, (sum, count))| (key, MoneyPerFlow(sum / count)))
        .collect()
}
