//! Commodities are the goods and services exchanged between the core model and the simulators.
use crate::id::{define_id_getter, define_id_type};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;

define_id_type! {CommodityID}

/// A map of [`Commodity`]s, keyed by commodity ID
pub type CommodityMap = IndexMap<CommodityID, Commodity>;

/// A commodity within the core model
#[derive(PartialEq, Debug, Deserialize, Clone)]
pub struct Commodity {
    /// Unique identifier for the commodity (e.g. "electr")
    pub id: CommodityID,
    /// Text description of commodity (e.g. "electricity")
    pub description: String,
    /// Whether the commodity is a fuel or a service demand
    pub kind: CommodityKind,
}
define_id_getter! {Commodity, CommodityID}

impl Commodity {
    /// Create a service commodity registered from simulator demand
    pub fn new_service(id: CommodityID) -> Self {
        Self {
            description: format!("Demand category {id}"),
            id,
            kind: CommodityKind::Service,
        }
    }
}

/// The role a commodity plays in the core model
#[derive(PartialEq, Eq, Debug, Clone, Copy, DeserializeLabeledStringEnum)]
pub enum CommodityKind {
    /// A fuel or energy carrier, priced by the core model
    #[string = "fuel"]
    Fuel,
    /// An energy service or floorspace demand, supplied by service technologies
    #[string = "service"]
    Service,
}
