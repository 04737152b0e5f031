//! `packhand plugins` command

use anyhow::Result;

use packhand::plugins::registry;

pub fn execute() -> Result<i32> {
    for plugin in registry() {
        println!("{:<20} {}", plugin.id(), plugin.runtime());
    }
    Ok(0)
}
