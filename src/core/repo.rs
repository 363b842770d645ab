//! Known manifest repositories and their mirrors.
//!
//! A repository is one published build of the client, identified by its
//! manifest filename and the relative path it lives under on the content
//! network. The same content is replicated across several mirror hosts;
//! which host actually works is only known once a manifest fetch succeeds,
//! so the mirror is bound to the descriptor at load time.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

/// Mirror hosts, tried in order until one serves the manifest.
pub const MIRRORS: [&str; 7] = [
    "http://ak.worldofwarcraft.com.edgesuite.net/",
    "http://dist.blizzard.com.edgesuite.net/",
    "http://blizzard.vo.llnwd.net/o16/content/",
    "http://client01.pdl.wow.battlenet.com.cn/",
    "http://client02.pdl.wow.battlenet.com.cn/",
    "http://client03.pdl.wow.battlenet.com.cn/",
    "http://client04.pdl.wow.battlenet.com.cn/",
];

/// Builds the content network is still known to serve. Paths containing a
/// `.direct` segment hold flat client files; the rest hold chunked archives.
const KNOWN_REPOSITORIES: [&str; 12] = [
    "wow-pod-retail/NA/16057.direct/wow-16057-2.mfil",
    "wow-pod-retail/EU/16057.direct/wow-16057-2.mfil",
    "wow-pod-retail/NA/18414.direct/wow-18414-1.mfil",
    "wow-pod-retail/EU/18414.direct/wow-18414-1.mfil",
    "wow-pod-retail/CN/18414.direct/wow-18414-1.mfil",
    "wow-pod-retail/NA/15595/wow-15595-1.mfil",
    "wow-pod-retail/EU/15595/wow-15595-1.mfil",
    "wow-pod-retail/KR/15595/wow-15595-1.mfil",
    "wow-pod-retail/NA/16057/wow-16057-2.mfil",
    "wow-pod-retail/EU/16057/wow-16057-2.mfil",
    "wow-pod-retail/NA/18414/wow-18414-1.mfil",
    "wow-pod-retail/TW/18414/wow-18414-1.mfil",
];

/// Client version names for the build numbers in the catalog.
const BUILDS: [(&str, &str); 12] = [
    ("13164", "4.0.1"),
    ("13329", "4.0.3"),
    ("13623", "4.0.6"),
    ("14333", "4.2.0"),
    ("14545", "4.2.2"),
    ("15005", "4.3.0"),
    ("15595", "4.3.4"),
    ("16016", "5.0.4"),
    ("16057", "5.0.5"),
    ("16309", "5.1.0"),
    ("17399", "5.4.0"),
    ("18414", "5.4.8"),
];

const REGIONS: [&str; 5] = ["CN", "EU", "KR", "NA", "TW"];

fn build_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(wow[tb]?)-(\d+)-").expect("static regex"))
}

/// How a repository publishes its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoKind {
    /// Files are served as-is and the client is assembled by the updater
    Direct,
    /// Archives are split into numbered chunks and rebuilt locally
    Streamed,
}

impl std::fmt::Display for RepoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Streamed => write!(f, "streamed"),
        }
    }
}

/// One published build on the content network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Relative directory under a mirror, with trailing slash
    path: String,
    /// Manifest filename, e.g. `wow-15595-1.mfil`
    manifest_name: String,
    pub kind: RepoKind,
    /// Mirror host serving this run; bound when a manifest fetch succeeds
    mirror: String,
}

impl Repository {
    /// Build a descriptor from a mirror-relative manifest path like
    /// `wow-pod-retail/EU/15595/wow-15595-1.mfil`.
    pub fn from_path(rel_path: &str) -> Option<Self> {
        let split = rel_path.rfind('/')?;
        let (dir, name) = rel_path.split_at(split + 1);
        if name.is_empty() {
            return None;
        }
        let kind = if dir.contains("direct") {
            RepoKind::Direct
        } else {
            RepoKind::Streamed
        };
        Some(Self {
            path: dir.to_string(),
            manifest_name: name.to_string(),
            kind,
            mirror: MIRRORS[0].to_string(),
        })
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    /// Pin the descriptor to the mirror that answered.
    pub fn bind_mirror(&mut self, mirror: &str) {
        self.mirror = mirror.to_string();
    }

    /// Mirror-qualified directory URL, with trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}{}", self.mirror, self.path)
    }

    pub fn manifest_url(&self) -> String {
        format!("{}{}", self.base_url(), self.manifest_name)
    }

    /// Manifest URL on a specific mirror, without binding it.
    pub fn manifest_url_on(&self, mirror: &str) -> String {
        format!("{}{}{}", mirror, self.path, self.manifest_name)
    }

    /// Human name like `4.3.4.15595 - wow EU`, derived from the manifest
    /// filename and the region segment of the path.
    pub fn display_name(&self) -> String {
        let region = self.region().unwrap_or("--");
        match build_re().captures(&self.manifest_name) {
            Some(caps) => {
                let branch = caps.get(1).map_or("", |m| m.as_str());
                let build = caps.get(2).map_or("", |m| m.as_str());
                match BUILDS.iter().find(|(b, _)| *b == build) {
                    Some((_, version)) => format!("{version}.{build} - {branch} {region}"),
                    None => format!("build {build} - {branch} {region}"),
                }
            }
            None => self.manifest_name.trim_end_matches(".mfil").to_string(),
        }
    }

    /// Directory the client is restored into when the operator does not
    /// pick one, e.g. `15595patch4.3.4`.
    pub fn default_directory(&self) -> PathBuf {
        if let Some(caps) = build_re().captures(&self.manifest_name) {
            let build = caps.get(2).map_or("", |m| m.as_str());
            if let Some((_, version)) = BUILDS.iter().find(|(b, _)| *b == build) {
                return PathBuf::from(format!("{build}patch{version}"));
            }
        }
        PathBuf::from(self.manifest_name.trim_end_matches(".mfil"))
    }

    fn region(&self) -> Option<&str> {
        self.path.split('/').find(|part| REGIONS.contains(part))
    }
}

/// Every build in the catalog.
pub fn all() -> Vec<Repository> {
    KNOWN_REPOSITORIES
        .iter()
        .filter_map(|rel| Repository::from_path(rel))
        .collect()
}

pub fn by_kind(kind: RepoKind) -> Vec<Repository> {
    all().into_iter().filter(|r| r.kind == kind).collect()
}

/// Look a build up by its manifest filename. Regions share manifest names,
/// so the first catalog match wins.
pub fn find_by_manifest(manifest_name: &str) -> Option<Repository> {
    all().into_iter().find(|r| r.manifest_name == manifest_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_splits_dir_and_manifest() {
        let repo = Repository::from_path("wow-pod-retail/EU/15595/wow-15595-1.mfil").unwrap();
        assert_eq!(repo.manifest_name(), "wow-15595-1.mfil");
        assert_eq!(repo.kind, RepoKind::Streamed);
        assert_eq!(
            repo.base_url(),
            format!("{}wow-pod-retail/EU/15595/", MIRRORS[0])
        );
    }

    #[test]
    fn test_direct_detected_from_path_segment() {
        let repo = Repository::from_path("wow-pod-retail/NA/16057.direct/wow-16057-2.mfil").unwrap();
        assert_eq!(repo.kind, RepoKind::Direct);
    }

    #[test]
    fn test_display_name_known_build() {
        let repo = Repository::from_path("wow-pod-retail/EU/15595/wow-15595-1.mfil").unwrap();
        assert_eq!(repo.display_name(), "4.3.4.15595 - wow EU");
    }

    #[test]
    fn test_display_name_unknown_build_falls_back_to_build_number() {
        let repo = Repository::from_path("wow-pod-retail/NA/99999/wow-99999-1.mfil").unwrap();
        assert_eq!(repo.display_name(), "build 99999 - wow NA");
    }

    #[test]
    fn test_default_directory() {
        let repo = Repository::from_path("wow-pod-retail/NA/16057/wow-16057-2.mfil").unwrap();
        assert_eq!(repo.default_directory(), PathBuf::from("16057patch5.0.5"));
    }

    #[test]
    fn test_bind_mirror_changes_base_url() {
        let mut repo = Repository::from_path("wow-pod-retail/NA/15595/wow-15595-1.mfil").unwrap();
        repo.bind_mirror("http://mirror.example/");
        assert_eq!(repo.base_url(), "http://mirror.example/wow-pod-retail/NA/15595/");
    }

    #[test]
    fn test_find_by_manifest() {
        assert!(find_by_manifest("wow-15595-1.mfil").is_some());
        assert!(find_by_manifest("wow-0-0.mfil").is_none());
    }

    #[test]
    fn test_catalog_has_both_kinds() {
        assert!(!by_kind(RepoKind::Direct).is_empty());
        assert!(!by_kind(RepoKind::Streamed).is_empty());
    }
}
