//! Repos command

use anyhow::Result;

use mfil::repo;

/// List every repository in the built-in catalog
pub fn repos() -> Result<()> {
    println!("Known repositories:");
    for repository in repo::all() {
        println!(
            "  {:<24} {:<8} {}",
            repository.display_name(),
            repository.kind,
            repository.manifest_name()
        );
    }
    Ok(())
}
