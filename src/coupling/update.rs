//! Applying merged demand to the core model.
use super::demand::DemandTable;
use super::error::CouplingError;
use crate::commodity::CommodityID;
use crate::core_model::{CoreModel, Technology, VALUE_OF_LOST_LOAD};
use crate::input::{deserialise_positive, read_csv_optional};
use crate::region::RegionID;
use crate::units::MoneyPerFlow;
use anyhow::{Context, Result, bail, ensure};
use log::{debug, info};
use serde::Deserialize;
use std::path::Path;

const SERVICE_TECHNOLOGIES_FILE_NAME: &str = "service_technologies.csv";

/// Audit label for every demand update
pub const DEMAND_COMMIT_MESSAGE: &str = "coupled demand update";

/// Audit label for the one-off registration of demand commodities and their technologies
pub const STRUCTURE_COMMIT_MESSAGE: &str = "register coupled demand commodities";

/// A technology which supplies a demand category from a fuel.
///
/// One technology is created per non-global region, named `<commodity>_<input>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceTechnologyTemplate {
    /// The demand category supplied
    pub commodity_id: CommodityID,
    /// The fuel consumed
    pub input_commodity: CommodityID,
    /// Units of demand met per unit of fuel
    #[serde(deserialize_with = "deserialise_positive")]
    pub efficiency: f64,
    /// Cost per unit of demand met
    pub variable_cost: MoneyPerFlow,
}

impl ServiceTechnologyTemplate {
    /// The technology created from this template for the given region
    pub fn technology(&self, region_id: &RegionID) -> Technology {
        Technology {
            id: format!("{}_{}", self.commodity_id, self.input_commodity).into(),
            region_id: region_id.clone(),
            input_commodity: Some(self.input_commodity.clone()),
            output_commodity: self.commodity_id.clone(),
            efficiency: self.efficiency,
            variable_cost: self.variable_cost,
            capacity: None,
        }
    }
}

/// Read service technology templates from the model directory. The file is optional.
pub fn read_service_technologies(model_dir: &Path) -> Result<Vec<ServiceTechnologyTemplate>> {
    let file_path = model_dir.join(SERVICE_TECHNOLOGIES_FILE_NAME);
    Ok(read_csv_optional(&file_path)?.collect())
}

/// Writes merged demand into the core model
pub struct CoreModelUpdater {
    templates: Vec<ServiceTechnologyTemplate>,
    global_region_suffix: String,
}

impl CoreModelUpdater {
    /// Create an updater
    ///
    /// # Arguments
    ///
    /// * `templates` - Technologies to create for new demand categories
    /// * `global_region_suffix` - No technologies are created in regions with this suffix
    pub fn new(templates: Vec<ServiceTechnologyTemplate>, global_region_suffix: &str) -> Self {
        Self {
            templates,
            global_region_suffix: global_region_suffix.to_string(),
        }
    }

    /// Apply `demand` to the core model, discarding its solution.
    ///
    /// On the first iteration, any demand commodities and service technologies the model lacks
    /// are registered first, in a transaction of their own.
    pub fn apply<C: CoreModel + ?Sized>(
        &self,
        core: &mut C,
        demand: &DemandTable,
        first_iteration: bool,
        iteration: u32,
    ) -> Result<()> {
        let to_error = |err: anyhow::Error| CouplingError::StructuralUpdate {
            iteration,
            message: format!("{err:#}"),
        };

        if first_iteration {
            self.register_structure(core, demand).map_err(to_error)?;
        }

        core.clear_solution();
        set_demand(core, demand)
            .context("Failed to apply demand")
            .map_err(to_error)?;
        debug!("Iteration {iteration}: applied {} demand entries", demand.len());

        Ok(())
    }

    /// Add missing demand commodities and their service technologies
    fn register_structure<C: CoreModel + ?Sized>(
        &self,
        core: &mut C,
        demand: &DemandTable,
    ) -> Result<()> {
        ensure!(
            core.has_parameter(VALUE_OF_LOST_LOAD),
            "Core model has no {VALUE_OF_LOST_LOAD} parameter"
        );

        let commodities = demand.commodities();
        let regions: Vec<_> = core
            .regions()
            .into_iter()
            .filter(|region| !region.is_global(&self.global_region_suffix))
            .collect();

        // Validate everything before making any changes
        let mut new_commodities = Vec::new();
        for commodity_id in &commodities {
            let has_template = self
                .templates
                .iter()
                .any(|template| &template.commodity_id == commodity_id);
            if !core.has_commodity(commodity_id) {
                if !has_template {
                    bail!("No service technology given for new demand commodity {commodity_id}");
                }
                new_commodities.push(commodity_id.clone());
            }
        }

        let mut new_technologies = Vec::new();
        for template in self
            .templates
            .iter()
            .filter(|template| commodities.contains(&template.commodity_id))
        {
            ensure!(
                core.has_commodity(&template.input_commodity),
                "Service technology for {} has unknown input commodity {}",
                template.commodity_id,
                template.input_commodity
            );
            for region_id in &regions {
                let technology = template.technology(region_id);
                if !core.has_technology(&technology.id, region_id) {
                    new_technologies.push(technology);
                }
            }
        }

        if new_commodities.is_empty() && new_technologies.is_empty() {
            return Ok(());
        }

        info!(
            "Registering {} demand commodities and {} technologies in the core model",
            new_commodities.len(),
            new_technologies.len()
        );
        core.check_out()?;
        for commodity_id in new_commodities {
            core.add_commodity(commodity_id)?;
        }
        for technology in new_technologies {
            core.add_technology(technology)?;
        }
        core.commit(STRUCTURE_COMMIT_MESSAGE)
    }
}

fn set_demand<C: CoreModel + ?Sized>(core: &mut C, demand: &DemandTable) -> Result<()> {
    core.check_out()?;
    core.set_demand(demand)?;
    core.commit(DEMAND_COMMIT_MESSAGE)
}
