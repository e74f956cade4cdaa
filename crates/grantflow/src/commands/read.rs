use colored::Colorize;
use grantflow_cloud::{ReadOutcome, StateManager};
use std::path::Path;

pub async fn handle(project_root: &Path, name: &str) -> anyhow::Result<()> {
    let manager = StateManager::new(project_root);
    let lock = manager.acquire_lock("read").await?;
    let mut state = manager.load().await?;

    let Some(grant) = state.get_grant_mut(name) else {
        anyhow::bail!("Grant {} is not recorded in state", name);
    };

    let controller = super::connect().await?;
    match controller.read(grant).await? {
        ReadOutcome::Present => super::print_grant(name, grant),
        ReadOutcome::Absent => {
            println!(
                "{} {} no longer exists, removing from state",
                "!".yellow(),
                name
            );
            state.remove_grant(name);
        }
    }

    manager.save(&state).await?;
    lock.release().await?;
    Ok(())
}
