pub mod deploy;
pub mod run;
pub mod tag;

use anyhow::{Context as _, Result};
use deploykit::Service;
use deploykit::services;

use crate::config::Project;

/// Every service in the project, honouring `build.ignore_dirs`.
pub fn discover_services(project: &Project) -> Result<Vec<Service>> {
    let services = services::discover(&project.root, &project.config.build.ignore_dirs)
        .context("Could not discover services")?;
    log::debug!(
        "services: {}",
        services
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(services)
}
