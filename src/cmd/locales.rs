//! Locales command

use anyhow::{bail, Context, Result};
use reqwest::Client;

use mfil::manifest::Manifest;
use mfil::repo;

/// Show which locales a repository's manifest offers
pub async fn locales(manifest_name: &str) -> Result<()> {
    // A full mirror URL works too; only the trailing filename matters.
    let manifest_name = mfil::filename_from_url(manifest_name);
    let Some(mut repository) = repo::find_by_manifest(manifest_name) else {
        bail!("Unknown manifest: {manifest_name}. Run 'mfil repos' for the catalog.");
    };

    let client = Client::new();
    let manifest = Manifest::fetch(&client, &mut repository)
        .await
        .context("Failed to fetch manifest")?;

    match manifest.locales() {
        Some(locales) if !locales.is_empty() => {
            println!(
                "Locales in {manifest_name} (manifest version {}):",
                manifest.version()
            );
            for locale in locales {
                println!("  {locale}");
            }
        }
        _ => println!("{manifest_name} does not declare locales."),
    }
    Ok(())
}
