//! Restore command - the interactive wizard

use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::warn;

use mfil::archive::StormEngine;
use mfil::manifest::Manifest;
use mfil::ops::download::Downloader;
use mfil::ops::install::Installer;
use mfil::repo::{self, RepoKind, Repository};
use mfil::session::Session;
use mfil::ui::{self, ConsoleProgress};

/// Client locales offered when a manifest does not declare its own.
const DEFAULT_LOCALES: [&str; 12] = [
    "deDE", "enGB", "enUS", "esES", "esMX", "frFR", "itIT", "koKR", "ptBR", "ruRU", "zhCN", "zhTW",
];

/// Walk the operator through restoring one client build.
pub async fn restore(
    dir: Option<PathBuf>,
    locale: Option<String>,
    os: Option<String>,
    repack: bool,
) -> Result<()> {
    let session_path = mfil::session_path();

    let resumed = match Session::load(&session_path)? {
        Some(previous) if confirm_resume(&previous)? => Some(previous),
        // Declined or absent; a fresh session overwrites the file on save.
        _ => None,
    };

    let (mut repository, previous) = match resumed {
        Some(session) => {
            let repository = repo::find_by_manifest(&session.manifest).with_context(|| {
                format!("Session references an unknown manifest: {}", session.manifest)
            })?;
            (repository, Some(session))
        }
        None => (pick_repository()?, None),
    };

    // No session is created or touched until the manifest is in hand.
    let client = Client::new();
    println!("Fetching {} ...", repository.manifest_name());
    let manifest = Manifest::fetch(&client, &mut repository).await?;

    let mut session = match previous {
        Some(mut session) => {
            if repack {
                session.repack_archives = true;
            }
            session
        }
        None => {
            let locale = match locale {
                Some(locale) => locale,
                None => pick_locale(&manifest)?,
            };
            let os = match os {
                Some(os) => os,
                None => pick_os()?,
            };
            let mut session = Session::new(repository.manifest_name(), &locale, &os);
            session.repack_archives = repack;
            session
        }
    };
    if let Err(err) = session.save(&session_path) {
        warn!(error = %err, "could not write the session checkpoint");
    }

    let install_dir = dir.unwrap_or_else(|| repository.default_directory());

    println!("Generating file list");
    let files = manifest.generate_file_list(&repository, &mut session, &session_path, &install_dir);
    println!(
        "{} file(s) to fetch into {}",
        files.len(),
        install_dir.display()
    );

    let progress = ConsoleProgress::start();
    let report = Downloader::new(&client, &install_dir, &session_path, &progress)
        .run(&files, &mut session)
        .await?;
    progress.finish();

    if !report.is_clean() {
        println!("{} file(s) could not be fetched:", report.abandoned.len());
        for path in &report.abandoned {
            println!("  {path}");
        }
    }

    install(&repository, &install_dir, &session_path, &mut session)?;

    if report.is_clean() {
        Session::delete(&session_path)?;
        println!("✓ Restore complete");
    } else {
        println!(
            "Session kept for another pass: {}",
            session_path.display()
        );
    }
    Ok(())
}

fn install(
    repository: &Repository,
    install_dir: &std::path::Path,
    session_path: &std::path::Path,
    session: &mut Session,
) -> Result<()> {
    match repository.kind {
        RepoKind::Direct => {
            let engine = StormEngine::load().context("StormLib is required for installation")?;
            let os = session.os.clone();
            let progress = ConsoleProgress::start();
            let installer = Installer::new(&engine, install_dir, session_path, &os, &progress);
            let extracted = installer.install_direct()?;
            let updates = installer.apply_updates()?;
            progress.finish();
            println!(
                "Extracted {extracted} file(s), {} patch archive(s) handed to the updater",
                updates.len()
            );
        }
        RepoKind::Streamed => {
            if !session.repack_archives {
                println!(
                    "NOTE: streamed data uses a chunked archive format; each '*.mpq.0' \
                     opens normally in MPQ tools. Repacking consolidates the chunks into \
                     flat archives the client can read (this takes a while)."
                );
                session.repack_archives = ui::prompt::confirm("Repack the downloaded archives?")?;
                if let Err(err) = session.save(session_path) {
                    warn!(error = %err, "could not write the session checkpoint");
                }
            }
            if session.repack_archives {
                let engine =
                    StormEngine::load().context("StormLib is required for repacking")?;
                let os = session.os.clone();
                let progress = ConsoleProgress::start();
                let installer = Installer::new(&engine, install_dir, session_path, &os, &progress);
                let report = installer.rebuild_streamed(session)?;
                progress.finish();
                println!(
                    "Consolidated {} archive group(s) ({} already done, {} left in chunks)",
                    report.rebuilt,
                    report.skipped,
                    report.unlisted + report.incomplete
                );
            }
        }
    }
    Ok(())
}

fn confirm_resume(previous: &Session) -> Result<bool> {
    let version = repo::find_by_manifest(&previous.manifest)
        .map(|r| r.display_name())
        .unwrap_or_else(|| previous.manifest.clone());
    println!("A previous unfinished session was found:");
    println!("  Version : {version}");
    println!("  Locale  : {}", previous.locale);
    println!("  OS      : {}", previous.os);
    Ok(ui::prompt::confirm("Continue this session?")?)
}

fn pick_repository() -> Result<Repository> {
    let kinds = [RepoKind::Direct, RepoKind::Streamed];
    let kind = *ui::prompt::select(
        "Which type of data do you want to restore:",
        &kinds,
        |kind| match kind {
            RepoKind::Direct => "Direct - produces a working client".to_string(),
            RepoKind::Streamed => "Streamed - produces a collection of archives".to_string(),
        },
    )?;

    let repositories = repo::by_kind(kind);
    let chosen = ui::prompt::select(
        "Which version do you want to restore:",
        &repositories,
        Repository::display_name,
    )?;
    Ok(chosen.clone())
}

fn pick_locale(manifest: &Manifest) -> Result<String> {
    let locales = match manifest.locales() {
        Some(locales) if !locales.is_empty() => locales,
        _ => DEFAULT_LOCALES.iter().map(|s| s.to_string()).collect(),
    };
    let chosen = ui::prompt::select("Which locale do you want to use:", &locales, Clone::clone)?;
    Ok(chosen.clone())
}

fn pick_os() -> Result<String> {
    let systems = ["Win", "OSX"];
    let chosen = ui::prompt::select("Which OS do you want to use:", &systems, |os| {
        os.to_string()
    })?;
    Ok(chosen.to_string())
}
