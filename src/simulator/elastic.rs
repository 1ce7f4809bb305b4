//! A demand simulator which scales baseline demand by a constant price elasticity.
use super::{DemandSimulator, Sector, SimulationConfig};
use crate::commodity::CommodityID;
use crate::coupling::demand::{RawDemandRecord, RawDemandTable};
use crate::coupling::prices::{PriceKey, PriceTable};
use crate::input::{input_err_msg, read_csv};
use crate::region::RegionID;
use crate::units::{Flow, MoneyPerFlow};
use anyhow::{Context, Result, ensure};
use log::debug;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// A row of the baseline demand file
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct BaselineRecord {
    /// Empty for rows outside the building sectors. These are only returned when no sector is
    /// requested.
    #[serde(default)]
    sector: String,
    region_id: RegionID,
    commodity_id: CommodityID,
    period: u32,
    value: Flow,
    unit: String,
    /// The fuel whose price drives this demand. Price-insensitive if absent.
    fuel: Option<CommodityID>,
    reference_price: Option<MoneyPerFlow>,
}

/// A row of baseline demand, validated
#[derive(Debug, Clone, PartialEq)]
struct BaselineDemand {
    sector: Option<Sector>,
    record: BaselineRecord,
}

/// Scales baseline demand by `(price / reference_price) ^ elasticity`
pub struct ElasticSimulator {
    name: String,
    baseline: Vec<BaselineDemand>,
    elasticity: f64,
}

impl ElasticSimulator {
    /// Read the baseline from a CSV file
    pub fn from_path(name: &str, file_path: &Path, elasticity: f64) -> Result<Self> {
        let baseline = read_csv::<BaselineRecord>(file_path)?
            .map(validate_record)
            .collect::<Result<Vec<_>>>()
            .with_context(|| input_err_msg(file_path))?;
        ensure!(
            elasticity.is_finite(),
            "Elasticity for simulator {name} must be finite"
        );

        Ok(Self {
            name: name.to_string(),
            baseline,
            elasticity,
        })
    }

    /// The demand for a baseline row at the given prices
    fn demand(&self, prices: &PriceTable, record: &BaselineRecord) -> Flow {
        let (Some(fuel), Some(reference_price)) = (&record.fuel, record.reference_price) else {
            return record.value;
        };
        let key = PriceKey {
            region_id: record.region_id.clone(),
            commodity_id: fuel.clone(),
            period: record.period,
        };
        match prices.get(&key) {
            Some(price) if price.is_finite() && price > MoneyPerFlow(0.0) => {
                record.value * (price / reference_price).powf(self.elasticity)
            }
            _ => record.value,
        }
    }
}

fn validate_record(record: BaselineRecord) -> Result<BaselineDemand> {
    let sector = if record.sector.is_empty() {
        None
    } else {
        Some(
            Sector::from_str(&record.sector)
                .with_context(|| format!("Invalid sector: {}", record.sector))?,
        )
    };
    if let Some(reference_price) = record.reference_price {
        ensure!(
            reference_price.is_finite() && reference_price > MoneyPerFlow(0.0),
            "Reference price for {} in {} must be a finite number greater than zero",
            record.commodity_id,
            record.region_id
        );
    }

    Ok(BaselineDemand { sector, record })
}

impl DemandSimulator for ElasticSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, prices: &PriceTable, config: &SimulationConfig) -> Result<RawDemandTable> {
        debug!(
            "Running {} for scenario {} ({})",
            self.name, config.scenario, config.climate
        );

        Ok(self
            .baseline
            .iter()
            .filter(|row| config.sector.is_none() || row.sector == config.sector)
            .map(|row| RawDemandRecord {
                region_id: row.record.region_id.clone(),
                commodity_id: row.record.commodity_id.clone(),
                period: row.record.period,
                value: Some(self.demand(prices, &row.record).value()),
                unit: Some(row.record.unit.clone()),
            })
            .collect())
    }
}
