use colored::Colorize;
use grantflow_cloud::StateManager;
use std::path::Path;

pub async fn handle(project_root: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let manager = StateManager::new(project_root);
    let lock = manager.acquire_lock("destroy").await?;
    let mut state = manager.load().await?;

    let names: Vec<String> = match name {
        Some(name) if state.get_grant(name).is_none() => {
            anyhow::bail!("Grant {} is not recorded in state", name);
        }
        Some(name) => vec![name.to_string()],
        None => state.grants.keys().cloned().collect(),
    };

    if names.is_empty() {
        println!("{}", "No grants recorded.".green());
        return Ok(());
    }

    let controller = super::connect().await?;
    let mut failed = 0;
    for name in names {
        let Some(grant) = state.get_grant_mut(&name) else {
            continue;
        };
        match controller.delete(grant).await {
            Ok(()) => {
                state.remove_grant(&name);
                println!("{} Revoked {}", "✓".green(), name);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", "✗".red(), name, e);
            }
        }
    }

    manager.save(&state).await?;
    lock.release().await?;

    if failed > 0 {
        anyhow::bail!("{} grant(s) could not be revoked", failed);
    }
    Ok(())
}
