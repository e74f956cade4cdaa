use crate::manifest::Manifest;
use colored::Colorize;
use grantflow_cloud::{Plan, StateManager};
use std::path::Path;

pub async fn handle(project_root: &Path, manifest_path: &Path) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    if let Some((name, error)) = manifest.validate().into_iter().next() {
        anyhow::bail!("Invalid grant {}: {}", name, error);
    }

    let manager = StateManager::new(project_root);
    let lock = manager.acquire_lock("apply").await?;
    let mut state = manager.load().await?;

    let controller = super::connect().await?;
    for name in controller.refresh(&mut state).await? {
        println!("{} {} no longer exists", "!".yellow(), name);
    }

    let plan = Plan::build(&manifest.grants, &state);
    if !plan.has_changes {
        manager.save(&state).await?;
        lock.release().await?;
        println!("{}", "No changes. Grants match the manifest.".green());
        return Ok(());
    }

    super::print_plan(&plan);
    println!();

    let result = controller.apply(&plan, &manifest.grants, &mut state).await;
    manager.save(&state).await?;
    lock.release().await?;

    for success in &result.succeeded {
        println!("{} {}", "✓".green(), success.message);
    }
    for failure in &result.failed {
        eprintln!(
            "{} {}: {}",
            "✗".red(),
            failure.action_id,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("Done in {} ms", result.duration_ms);

    if !result.is_success() {
        anyhow::bail!("{} action(s) failed", result.failed.len());
    }
    Ok(())
}
