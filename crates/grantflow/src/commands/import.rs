use colored::Colorize;
use grantflow_cloud::{StateManager, parse_import_key};
use std::path::Path;

pub async fn handle(project_root: &Path, name: &str, id: &str) -> anyhow::Result<()> {
    // Reject malformed ids before touching state or credentials.
    parse_import_key(id)?;

    let manager = StateManager::new(project_root);
    let lock = manager.acquire_lock("import").await?;
    let mut state = manager.load().await?;

    if state.get_grant(name).is_some() {
        anyhow::bail!("Grant {} is already recorded in state", name);
    }

    let controller = super::connect().await?;
    let grant = controller.import(id).await?;
    super::print_grant(name, &grant);
    state.set_grant(name.to_string(), grant);

    manager.save(&state).await?;
    lock.release().await?;
    println!("{} Imported {}", "✓".green(), name);
    Ok(())
}
