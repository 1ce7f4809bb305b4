//! Demand tables exchanged between the simulators and the core model.
use crate::commodity::CommodityID;
use crate::id::define_id_type;
use crate::region::RegionID;
use crate::units::Flow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, btree_map};

define_id_type! {LevelID}
define_id_type! {TimeID}

/// A raw demand record, as returned by a demand simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDemandRecord {
    /// The region of the demand entry
    pub region_id: RegionID,
    /// The demand category, named as the simulator names it
    pub commodity_id: CommodityID,
    /// The period of the demand entry
    pub period: u32,
    /// The demand value. Simulators may leave this empty.
    pub value: Option<f64>,
    /// The unit the value is expressed in, if the simulator provides one
    #[serde(default)]
    pub unit: Option<String>,
}

/// The unprocessed output of a single demand simulator run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDemandTable(Vec<RawDemandRecord>);

impl RawDemandTable {
    /// Iterate over the records
    pub fn iter(&self) -> impl Iterator<Item = &RawDemandRecord> {
        self.0.iter()
    }

    /// The number of records
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no records
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<RawDemandRecord> for RawDemandTable {
    fn from_iter<I: IntoIterator<Item = RawDemandRecord>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identifies a single demand value.
///
/// The field order defines the ordering of [`DemandTable`]s: by region, commodity, then period.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DemandKey {
    /// The region the demand applies to
    pub region_id: RegionID,
    /// The demand commodity
    pub commodity_id: CommodityID,
    /// The model period
    pub period: u32,
    /// The commodity level (e.g. "useful")
    pub level: LevelID,
    /// The sub-period (e.g. "year")
    pub time: TimeID,
}

/// A demand value along with its unit
#[derive(Debug, Clone, PartialEq)]
pub struct DemandEntry {
    /// The amount demanded
    pub value: Flow,
    /// The unit tag for `value`
    pub unit: String,
}

/// A merged demand table, with exactly one value per [`DemandKey`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemandTable(BTreeMap<DemandKey, DemandEntry>);

impl DemandTable {
    /// Insert a value, returning the previous entry for this key, if any
    pub fn insert(&mut self, key: DemandKey, entry: DemandEntry) -> Option<DemandEntry> {
        self.0.insert(key, entry)
    }

    /// Get the entry for the given key
    pub fn get(&self, key: &DemandKey) -> Option<&DemandEntry> {
        self.0.get(key)
    }

    /// Iterate over entries in (region, commodity, period) order
    pub fn iter(&self) -> btree_map::Iter<'_, DemandKey, DemandEntry> {
        self.0.iter()
    }

    /// Iterate over the keys in order
    pub fn keys(&self) -> btree_map::Keys<'_, DemandKey, DemandEntry> {
        self.0.keys()
    }

    /// The number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the entries for which `f` returns true
    pub fn retain<F: FnMut(&DemandKey, &mut DemandEntry) -> bool>(&mut self, f: F) {
        self.0.retain(f);
    }

    /// All commodities with at least one entry
    pub fn commodities(&self) -> BTreeSet<CommodityID> {
        self.0.keys().map(|key| key.commodity_id.clone()).collect()
    }

    /// Add the entries of `other` to this table, summing values where a key is in both.
    ///
    /// Units of existing entries are kept. Returns the number of keys which were already present.
    pub fn accumulate(&mut self, other: &DemandTable) -> usize {
        let mut num_shared = 0;
        for (key, entry) in other {
            match self.0.get_mut(key) {
                Some(existing) => {
                    existing.value += entry.value;
                    num_shared += 1;
                }
                None => {
                    self.0.insert(key.clone(), entry.clone());
                }
            }
        }

        num_shared
    }

    /// Element-wise mean of two tables.
    ///
    /// Only keys present in both tables appear in the result. Units are taken from `newer`.
    pub fn average(older: &DemandTable, newer: &DemandTable) -> DemandTable {
        newer
            .iter()
            .filter_map(|(key, entry)| {
                let other = older.get(key)?;
                let value = Flow((entry.value.value() + other.value.value()) / 2.0);
                Some((
                    key.clone(),
                    DemandEntry {
                        value,
                        unit: entry.unit.clone(),
                    },
                ))
            })
            .collect()
    }
}

impl FromIterator<(DemandKey, DemandEntry)> for DemandTable {
    fn from_iter<I: IntoIterator<Item = (DemandKey, DemandEntry)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DemandTable {
    type Item = (&'a DemandKey, &'a DemandEntry);
    type IntoIter = btree_map::Iter<'a, DemandKey, DemandEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{demand_entry, demand_key};

    #[test]
    fn test_ordering_by_region_commodity_period() {
        let table: DemandTable = [
            (demand_key("R2", "heat", 2020), demand_entry(1.0)),
            (demand_key("R1", "heat", 2030), demand_entry(2.0)),
            (demand_key("R1", "cool", 2030), demand_entry(3.0)),
            (demand_key("R1", "heat", 2020), demand_entry(4.0)),
        ]
        .into_iter()
        .collect();

        let order: Vec<_> = table
            .keys()
            .map(|key| (key.region_id.as_str(), key.commodity_id.as_str(), key.period))
            .collect();
        assert_eq!(
            order,
            [
                ("R1", "cool", 2030),
                ("R1", "heat", 2020),
                ("R1", "heat", 2030),
                ("R2", "heat", 2020)
            ]
        );
    }

    #[test]
    fn test_average_drops_unmatched_keys() {
        let older: DemandTable = [
            (demand_key("R1", "heat", 2020), demand_entry(2.0)),
            (demand_key("R1", "heat", 2030), demand_entry(7.0)),
        ]
        .into_iter()
        .collect();
        let newer: DemandTable = [
            (demand_key("R1", "heat", 2020), demand_entry(4.0)),
            (demand_key("R1", "cool", 2020), demand_entry(1.0)),
        ]
        .into_iter()
        .collect();

        let averaged = DemandTable::average(&older, &newer);
        assert_eq!(averaged.len(), 1);
        assert_eq!(
            averaged.get(&demand_key("R1", "heat", 2020)).unwrap().value,
            Flow(3.0)
        );
    }

    #[test]
    fn test_accumulate() {
        let commercial: DemandTable = [
            (demand_key("R1", "comm_heat", 2020), demand_entry(5.0)),
            (demand_key("R1", "heat", 2020), demand_entry(6.0)),
        ]
        .into_iter()
        .collect();
        let mut current: DemandTable = [
            (demand_key("R1", "heat", 2020), demand_entry(3.0)),
            (demand_key("R1", "resid_cool", 2020), demand_entry(1.0)),
        ]
        .into_iter()
        .collect();

        assert_eq!(current.accumulate(&commercial), 1);
        assert_eq!(current.len(), 3);
        let value = |commodity| {
            current
                .get(&demand_key("R1", commodity, 2020))
                .unwrap()
                .value
        };
        assert_eq!(value("comm_heat"), Flow(5.0));
        assert_eq!(value("heat"), Flow(9.0));
        assert_eq!(value("resid_cool"), Flow(1.0));
    }
}
