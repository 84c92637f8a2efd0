pub mod doctor;
pub mod enrich;
pub mod export;
pub mod graph;
pub mod index;
pub mod lineage;
pub mod search;
pub mod where_used;
pub mod worker;

use std::path::Path;

use llmc_core::Config;

/// Load `<repo>/llmc.toml`, falling back to defaults when absent.
pub(crate) fn load_config(repo: &Path) -> anyhow::Result<Config> {
    Ok(Config::load(&repo.join("llmc.toml"))?)
}
