pub mod apply;
pub mod destroy;
pub mod import;
pub mod plan;
pub mod read;
pub mod validate;

use colored::Colorize;
use grantflow_cloud::{ActionType, ConvergenceController, Grant, Plan};

/// Controller against AWS KMS, configured from the settings file
#[cfg(feature = "aws")]
pub async fn connect() -> anyhow::Result<ConvergenceController> {
    let settings = grantflow_config::load_settings()?;
    let config = grantflow_cloud::ControllerConfig::from_settings(&settings);
    let api = grantflow_cloud_aws::KmsGrantApi::from_env(
        settings.aws.region.clone(),
        settings.aws.profile.clone(),
    )
    .await?;
    Ok(ConvergenceController::with_config(
        std::sync::Arc::new(api),
        config,
    ))
}

#[cfg(not(feature = "aws"))]
pub async fn connect() -> anyhow::Result<ConvergenceController> {
    anyhow::bail!("grant was built without the `aws` feature")
}

pub fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Replace => "-/+".yellow(),
            ActionType::Delete => "-".red(),
            ActionType::NoOp => continue,
        };
        println!("  {} {}", marker, action.description);
    }
    println!();
    println!("Plan: {}", plan.summary().to_string().bold());
}

pub fn print_grant(name: &str, grant: &Grant) {
    println!("{}", name.cyan().bold());
    println!(
        "  grant_id:  {}",
        grant.grant_id.as_deref().unwrap_or("(none)")
    );
    println!("  key_id:    {}", grant.key_id());
    println!("  grantee:   {}", grant.spec.grantee_principal);
    if let Some(retiring) = &grant.spec.retiring_principal {
        println!("  retiring:  {}", retiring);
    }
    let operations: Vec<&str> = grant.spec.operations.iter().map(String::as_str).collect();
    println!("  ops:       {}", operations.join(", "));
    for variant in grant.spec.constraints.iter() {
        let mut pairs: Vec<String> = variant
            .context
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        println!("  {}: {}", variant.kind, pairs.join(", "));
    }
    println!("  state:     {}", grant.lifecycle);
}
