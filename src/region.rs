//! Regions represent different geographical areas covered by the core model.
use crate::id::{define_id_getter, define_id_type};
use indexmap::IndexMap;
use serde::Deserialize;

define_id_type! {RegionID}

/// A map of [`Region`]s, keyed by region ID
pub type RegionMap = IndexMap<RegionID, Region>;

/// Represents a region with an ID and a longer description.
#[derive(Debug, Deserialize, PartialEq)]
pub struct Region {
    /// A unique identifier for a region (e.g. "R12_NAM").
    pub id: RegionID,
    /// A text description of the region (e.g. "North America").
    pub description: String,
}
define_id_getter! {Region, RegionID}

impl RegionID {
    /// Whether this region is a global aggregate, as indicated by the reserved suffix
    pub fn is_global(&self, global_suffix: &str) -> bool {
        !global_suffix.is_empty() && self.0.ends_with(global_suffix)
    }
}
