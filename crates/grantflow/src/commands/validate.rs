use crate::manifest::Manifest;
use colored::Colorize;
use std::path::Path;

pub fn handle(manifest_path: &Path) -> anyhow::Result<()> {
    println!("{}", "Validating manifest...".blue());

    let manifest = Manifest::load(manifest_path)?;
    let errors = manifest.validate();

    if errors.is_empty() {
        println!("{}", "✓ Manifest is valid".green().bold());
        println!("  grants: {}", manifest.grants.len());
        for (name, spec) in &manifest.grants {
            println!("    - {} (key {})", name.cyan(), spec.key_id);
        }
        return Ok(());
    }

    eprintln!("{}", "✗ Manifest errors".red().bold());
    for (name, error) in &errors {
        eprintln!("  {}: {}", name, error);
    }
    anyhow::bail!("{} invalid grant(s)", errors.len())
}
