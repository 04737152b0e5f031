//! Shipped plugins.
//!
//! Plugins are registered statically; [`registry`] returns them in
//! selection order, which is also the order of [`PluginId::ALL`].

mod composer;
mod functions_framework;
mod npm;
mod python;
mod python_runtime;
mod rails;

pub use composer::ComposerPlugin;
pub use functions_framework::FunctionsFrameworkPlugin;
pub use npm::NpmPlugin;
pub use python_runtime::PythonRuntimePlugin;
pub use rails::RailsAssetsPlugin;

use crate::core::plugin::{Plugin, PluginId};

/// Look up the plugin for an id.
pub fn plugin(id: PluginId) -> &'static dyn Plugin {
    match id {
        PluginId::ComposerBuild => &ComposerPlugin,
        PluginId::RailsAssets => &RailsAssetsPlugin,
        PluginId::NpmInstall => &NpmPlugin,
        PluginId::FunctionsFramework => &FunctionsFrameworkPlugin,
        PluginId::PythonRuntime => &PythonRuntimePlugin,
    }
}

/// All plugins in selection order.
pub fn registry() -> Vec<&'static dyn Plugin> {
    PluginId::ALL.into_iter().map(plugin).collect()
}
