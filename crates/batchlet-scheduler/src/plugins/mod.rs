//! The canonical policy plugins

pub mod drf;
pub mod gang;
pub mod nodeorder;
pub mod predicates;
pub mod priority;
pub mod proportion;

use crate::framework::PluginRegistry;

/// The registry with every canonical plugin registered
pub fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register("priority", priority::new);
    registry.register("gang", gang::new);
    registry.register("drf", drf::new);
    registry.register("predicates", predicates::new);
    registry.register("proportion", proportion::new);
    registry.register("nodeorder", nodeorder::new);
    registry
}
