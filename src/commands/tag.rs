use anyhow::Result;
use deploykit::buildtag;
use std::path::PathBuf;

use crate::Context;
use crate::config::Project;
use crate::ui;

/// Print the build tag a deploy would stamp right now.
///
/// The tag goes to stdout on its own line so scripts can capture it.
pub fn run(ctx: &Context) -> Result<()> {
    let project = Project::load(ctx.root.as_deref())?;
    let services = super::discover_services(&project)?;
    if services.is_empty() && !ctx.quiet {
        ui::warn("No services found (directories containing a Dockerfile)");
    }

    let dirs: Vec<PathBuf> = services.into_iter().map(|s| s.dir).collect();
    let tag = buildtag::compute(&project.root, &dirs)?;
    println!("{tag}");
    Ok(())
}
