//! Desired-state expansion
//!
//! Expands the spec's collection list into the set of engine-side instance
//! names that must exist. With blue/green enabled each entry doubles into
//! `<name>_blue` and `<name>_green` sharing one alias. The reserved checksum
//! collection is owned by bootstrap and never appears here.

use std::collections::BTreeMap;

use solrset_common::crd::SolrCollectionSetSpec;

/// Suffix of the blue instance of a blue/green pair
pub const BLUE_SUFFIX: &str = "_blue";

/// Suffix of the green instance of a blue/green pair
pub const GREEN_SUFFIX: &str = "_green";

/// One engine-side instance the spec calls for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredInstance {
    /// The spec entry's name (no suffix)
    pub spec_name: String,
    /// Alias shared by the pair; only materialized when blue/green is on
    pub alias: String,
    /// Configset backing the instance
    pub configset: String,
    /// Whether this instance is half of a blue/green pair
    pub blue_green: bool,
}

/// instance name -> desired instance, ordered for deterministic planning
pub type DesiredInstances = BTreeMap<String, DesiredInstance>;

/// Expand the spec into the instances that must exist on the cluster.
pub fn expand(spec: &SolrCollectionSetSpec) -> DesiredInstances {
    let blue_green = spec.blue_green_enabled();
    let mut desired = DesiredInstances::new();

    for collection in &spec.collections {
        let template = DesiredInstance {
            spec_name: collection.name.clone(),
            alias: collection.alias().to_string(),
            configset: collection.configset_name().to_string(),
            blue_green,
        };
        if blue_green {
            for suffix in [BLUE_SUFFIX, GREEN_SUFFIX] {
                desired.insert(format!("{}{}", collection.name, suffix), template.clone());
            }
        } else {
            desired.insert(collection.name.clone(), template.clone());
        }
    }

    desired
}
