//! Merging the simulators' outputs into a single demand table for the core model.
use super::demand::{
    DemandEntry, DemandKey, DemandTable, LevelID, RawDemandRecord, RawDemandTable, TimeID,
};
use crate::commodity::CommodityID;
use crate::region::RegionID;
use crate::units::Flow;
use anyhow::{Result, ensure};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Rules for selecting and renaming demand categories, as given in the `[merge]` table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MergeRules {
    /// End-use categories containing this marker are superseded by the building-stock model
    pub thermal_marker: String,
    /// Building-stock categories containing any of these markers are included
    pub building_markers: Vec<String>,
    /// Floorspace categories, included from the building-stock outputs
    pub floor_markers: Vec<String>,
    /// Legacy label replaced by `canonical_label` wherever it appears in a category name
    pub legacy_label: String,
    /// Replacement for `legacy_label`
    pub canonical_label: String,
    /// Unit for records which don't give one
    pub default_unit: String,
}

impl Default for MergeRules {
    fn default() -> Self {
        Self {
            thermal_marker: "therm".into(),
            building_markers: vec!["hotwater".into(), "cool".into(), "heat".into()],
            floor_markers: vec!["floor_construction".into(), "floor_demolition".into()],
            legacy_label: "non-comm".into(),
            canonical_label: "biomass_nc".into(),
            default_unit: "GWa".into(),
        }
    }
}

impl MergeRules {
    fn is_thermal(&self, commodity: &str) -> bool {
        !self.thermal_marker.is_empty() && commodity.contains(&self.thermal_marker)
    }

    fn is_building(&self, commodity: &str) -> bool {
        self.building_markers
            .iter()
            .chain(&self.floor_markers)
            .any(|marker| commodity.contains(marker.as_str()))
    }

    fn relabel(&self, commodity: &CommodityID) -> CommodityID {
        if !self.legacy_label.is_empty() && commodity.as_str().contains(&self.legacy_label) {
            commodity
                .as_str()
                .replace(&self.legacy_label, &self.canonical_label)
                .into()
        } else {
            commodity.clone()
        }
    }
}

/// The periods demand is needed for
#[derive(Debug, Clone, PartialEq)]
pub struct Horizon {
    periods: Vec<u32>,
    first_model_period: u32,
    placeholder_period: u32,
}

impl Horizon {
    /// Create a horizon, checking that the placeholder period has two preceding periods
    pub fn new(
        periods: Vec<u32>,
        first_model_period: u32,
        placeholder_period: u32,
    ) -> Result<Self> {
        let position = periods.iter().position(|period| *period == placeholder_period);
        ensure!(
            position.is_some_and(|position| position >= 2),
            "Placeholder period {placeholder_period} must be one of the periods, with at least two \
            periods before it"
        );

        Ok(Self {
            periods,
            first_model_period,
            placeholder_period,
        })
    }

    /// The periods of the horizon, in ascending order
    pub fn periods(&self) -> &[u32] {
        &self.periods
    }

    /// The long-run placeholder period, whose demand is extrapolated
    pub fn placeholder_period(&self) -> u32 {
        self.placeholder_period
    }
}

/// Extrapolate the value for the period after `last`, assuming compound growth.
///
/// The result is `last² / middle`, except where `middle` is zero, the result is more than three
/// times `last`, or the result is NaN: then it is `last / 2`.
pub fn extrapolate(middle: f64, last: f64) -> f64 {
    if middle == 0.0 {
        return last / 2.0;
    }

    let value = last * last / middle;
    if value > 3.0 * last || value.is_nan() {
        last / 2.0
    } else {
        value
    }
}

/// A single (region, commodity) demand series, before period extension
#[derive(Default)]
struct Series {
    values: BTreeMap<u32, f64>,
    unit: Option<String>,
}

/// Merges the simulators' outputs into a [`DemandTable`]
pub struct DemandMerger {
    rules: MergeRules,
    horizon: Horizon,
    level: LevelID,
    time: TimeID,
}

impl DemandMerger {
    /// Create a merger
    ///
    /// # Arguments
    ///
    /// * `rules` - Rules for selecting and renaming categories
    /// * `horizon` - The periods to produce demand for
    /// * `level` - The level of every demand entry (e.g. "useful")
    /// * `time` - The sub-period of every demand entry (e.g. "year")
    pub fn new(rules: MergeRules, horizon: Horizon, level: LevelID, time: TimeID) -> Self {
        Self {
            rules,
            horizon,
            level,
            time,
        }
    }

    /// The horizon demand is produced for
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// The records of building-stock categories in a simulator output
    fn select_building<'a>(
        &'a self,
        raw: &'a RawDemandTable,
    ) -> impl Iterator<Item = &'a RawDemandRecord> {
        raw.iter()
            .filter(|record| self.rules.is_building(record.commodity_id.as_str()))
    }

    /// Merge the commercial building-stock output on its own.
    ///
    /// The commercial sub-model only runs on the first iteration, so the caller keeps this table
    /// and adds it to the demand of every later iteration.
    pub fn merge_commercial(&self, building_raw_comm: &RawDemandTable) -> DemandTable {
        let empty = RawDemandTable::default();
        self.merge(&empty, &empty, building_raw_comm, true)
    }

    /// Merge the simulator outputs.
    ///
    /// Commercial building-stock categories are only included when `first_iteration` is set; on
    /// later iterations the caller adds the table from [`DemandMerger::merge_commercial`].
    pub fn merge(
        &self,
        end_use_raw: &RawDemandTable,
        building_raw_resid: &RawDemandTable,
        building_raw_comm: &RawDemandTable,
        first_iteration: bool,
    ) -> DemandTable {
        let end_use = end_use_raw
            .iter()
            .filter(|record| !self.rules.is_thermal(record.commodity_id.as_str()));
        let resid = self.select_building(building_raw_resid);
        let comm = self
            .select_building(building_raw_comm)
            .filter(|_| first_iteration);

        let mut series: BTreeMap<(RegionID, CommodityID), Series> = BTreeMap::new();
        for record in end_use.chain(resid).chain(comm) {
            let commodity_id = self.rules.relabel(&record.commodity_id);
            let entry = series
                .entry((record.region_id.clone(), commodity_id))
                .or_default();
            let value = record.value.filter(|value| !value.is_nan()).unwrap_or(0.0);
            *entry.values.entry(record.period).or_default() += value;
            if entry.unit.is_none() {
                entry.unit.clone_from(&record.unit);
            }
        }

        let mut table = DemandTable::default();
        for ((region_id, commodity_id), series) in series {
            let unit = series
                .unit
                .unwrap_or_else(|| self.rules.default_unit.clone());
            for (period, value) in self.extend_periods(&series.values) {
                let key = DemandKey {
                    region_id: region_id.clone(),
                    commodity_id: commodity_id.clone(),
                    period,
                    level: self.level.clone(),
                    time: self.time.clone(),
                };
                let entry = DemandEntry {
                    value: Flow(value),
                    unit: unit.clone(),
                };
                table.insert(key, entry);
            }
        }
        debug!("Merged demand table has {} entries", table.len());

        table
    }

    /// Produce a value for every period of the horizon
    fn extend_periods(&self, values: &BTreeMap<u32, f64>) -> Vec<(u32, f64)> {
        let horizon = &self.horizon;
        let value_at = |period: u32| {
            if period < horizon.first_model_period {
                0.0
            } else {
                values.get(&period).copied().unwrap_or(0.0)
            }
        };

        horizon
            .periods
            .iter()
            .enumerate()
            .map(|(idx, &period)| {
                if period == horizon.placeholder_period {
                    let middle = value_at(horizon.periods[idx - 2]);
                    let last = value_at(horizon.periods[idx - 1]);
                    (period, extrapolate(middle, last))
                } else {
                    (period, value_at(period))
                }
            })
            .collect()
    }
}
