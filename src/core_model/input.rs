//! Reading the reference core model from a model directory.
use super::linear::LinearModel;
use super::parameters::CoreModelParameters;
use super::{PriceRow, Technology, TechnologyMap};
use crate::commodity::{Commodity, CommodityID, CommodityMap};
use crate::coupling::demand::{DemandEntry, DemandKey, DemandTable, LevelID, TimeID};
use crate::input::{input_err_msg, read_csv, read_csv_id_file, read_csv_optional};
use crate::region::{RegionID, RegionMap};
use crate::units::Flow;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

const REGIONS_FILE_NAME: &str = "regions.csv";
const COMMODITIES_FILE_NAME: &str = "commodities.csv";
const TECHNOLOGIES_FILE_NAME: &str = "technologies.csv";
const DEMAND_FILE_NAME: &str = "demand.csv";
const REFERENCE_PRICES_FILE_NAME: &str = "reference_prices.csv";

/// A row of `demand.csv`
#[derive(Debug, Deserialize)]
struct DemandRecord {
    region_id: RegionID,
    commodity_id: CommodityID,
    level: LevelID,
    period: u32,
    time: TimeID,
    value: Flow,
    unit: String,
}

/// Read the core model from the specified directory.
///
/// # Arguments
///
/// * `model_dir` - Folder containing model configuration files
pub fn read_core_model(model_dir: &Path) -> Result<LinearModel> {
    let parameters = CoreModelParameters::from_path(model_dir)?;
    let regions = read_regions(model_dir)?;
    let commodities = read_commodities(model_dir)?;
    let technologies = read_technologies(model_dir)?;
    let demand = read_demand(model_dir)?;
    let reference_prices = read_reference_prices(model_dir)?;

    LinearModel::new(
        parameters,
        regions,
        commodities,
        technologies,
        demand,
        reference_prices,
    )
    .with_context(|| format!("Invalid core model in {}", model_dir.display()))
}

fn read_regions(model_dir: &Path) -> Result<RegionMap> {
    read_csv_id_file(&model_dir.join(REGIONS_FILE_NAME))
}

fn read_commodities(model_dir: &Path) -> Result<CommodityMap> {
    read_csv_id_file::<Commodity, CommodityID>(&model_dir.join(COMMODITIES_FILE_NAME))
}

/// Read technologies. The same ID may appear once per region.
fn read_technologies(model_dir: &Path) -> Result<TechnologyMap> {
    let file_path = model_dir.join(TECHNOLOGIES_FILE_NAME);
    read_technologies_from_iter(read_csv(&file_path)?)
        .with_context(|| input_err_msg(&file_path))
}

fn read_technologies_from_iter<I>(iter: I) -> Result<TechnologyMap>
where
    I: Iterator<Item = Technology>,
{
    let mut technologies = TechnologyMap::new();
    for technology in iter {
        let key = (technology.id.clone(), technology.region_id.clone());
        ensure!(
            !technologies.contains_key(&key),
            "Duplicate technology {} in region {}",
            technology.id,
            technology.region_id
        );
        technologies.insert(key, technology);
    }

    Ok(technologies)
}

/// Read the base demand. The file is optional.
fn read_demand(model_dir: &Path) -> Result<DemandTable> {
    let file_path = model_dir.join(DEMAND_FILE_NAME);
    read_demand_from_iter(read_csv_optional(&file_path)?)
        .with_context(|| input_err_msg(&file_path))
}

fn read_demand_from_iter<I>(iter: I) -> Result<DemandTable>
where
    I: Iterator<Item = DemandRecord>,
{
    let mut demand = DemandTable::default();
    for record in iter {
        let key = DemandKey {
            region_id: record.region_id,
            commodity_id: record.commodity_id,
            period: record.period,
            level: record.level,
            time: record.time,
        };
        let entry = DemandEntry {
            value: record.value,
            unit: record.unit,
        };
        ensure!(
            demand.insert(key.clone(), entry).is_none(),
            "Duplicate demand entry for {} in region {} ({})",
            key.commodity_id,
            key.region_id,
            key.period
        );
    }

    Ok(demand)
}

/// Read reference prices, if the file is present
fn read_reference_prices(model_dir: &Path) -> Result<Option<Vec<PriceRow>>> {
    let file_path = model_dir.join(REFERENCE_PRICES_FILE_NAME);
    if !file_path.exists() {
        return Ok(None);
    }

    let prices: Vec<PriceRow> = read_csv_optional(&file_path)?.collect();
    for row in &prices {
        ensure!(
            row.value.is_finite(),
            "{}: reference price for {} in {} ({}) is not finite",
            file_path.display(),
            row.commodity_id,
            row.region_id,
            row.period
        );
    }

    Ok(Some(prices))
}
