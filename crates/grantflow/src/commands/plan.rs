use crate::manifest::Manifest;
use colored::Colorize;
use grantflow_cloud::{Plan, StateManager};
use std::path::Path;

pub async fn handle(project_root: &Path, manifest_path: &Path, refresh: bool) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    if let Some((name, error)) = manifest.validate().into_iter().next() {
        anyhow::bail!("Invalid grant {}: {}", name, error);
    }

    let manager = StateManager::new(project_root);
    let mut state = manager.load().await?;

    if refresh {
        let controller = super::connect().await?;
        for name in controller.refresh(&mut state).await? {
            println!("{} {} no longer exists", "!".yellow(), name);
        }
    }

    let plan = Plan::build(&manifest.grants, &state);
    if !plan.has_changes {
        println!("{}", "No changes. Grants match the manifest.".green());
        return Ok(());
    }

    super::print_plan(&plan);
    Ok(())
}
