//! Loading profile definitions from Unison-style `.prf` files.
//!
//! Only the attributes the daemon needs are read: `root`, `path`,
//! `mountpoint` and `label`. `include`/`source` pull in other files from the
//! same directory; `include?` skips missing files silently.

use crate::profile::ProfileDef;
use crate::utils::paths::resolve_local;
use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extension of profile files.
pub const PROFILE_EXTENSION: &str = "prf";

/// Maximum include nesting.
const MAX_INCLUDE_DEPTH: usize = 8;

/// Source of profile definitions.
///
/// Implementations return only valid definitions; invalid ones are logged
/// and left out.
pub trait ProfileLoader {
    /// Loads the current set of profile definitions.
    ///
    /// # Errors
    ///
    /// Returns an error when the profile source as a whole cannot be read.
    fn load(&self) -> Result<Vec<ProfileDef>>;
}

/// Loads every `*.prf` file in one directory.
#[derive(Debug, Clone)]
pub struct PrfLoader {
    dir: PathBuf,
}

impl PrfLoader {
    /// Creates a loader for `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory being read.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn profile_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/*.{PROFILE_EXTENSION}",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );

        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .with_context(|| format!("Invalid profile directory: {}", self.dir.display()))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "unreadable profile file");
                    None
                }
            })
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| !name.starts_with('.'))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl ProfileLoader for PrfLoader {
    fn load(&self) -> Result<Vec<ProfileDef>> {
        if !self.dir.is_dir() {
            bail!("Profile directory not found: {}", self.dir.display());
        }

        let mut defs = Vec::new();
        for file in self.profile_files()? {
            let Some(name) = file.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let def = match parse_profile(&self.dir, name) {
                Ok(def) => def,
                Err(e) => {
                    warn!(profile = %name, error = %format!("{e:#}"), "skipping unreadable profile");
                    continue;
                }
            };
            match def.validate() {
                Ok(()) => defs.push(def),
                Err(e) => warn!(error = %e, "profile excluded"),
            }
        }
        debug!(dir = %self.dir.display(), count = defs.len(), "profiles loaded");
        Ok(defs)
    }
}

/// Raw attributes collected across a profile and its includes.
#[derive(Debug, Default)]
struct RawProfile {
    roots: Vec<String>,
    paths: Vec<String>,
    mountpoints: Vec<String>,
    label: Option<String>,
}

/// Parses profile `name` from `dir`, following includes.
///
/// Remote roots (`ssh://host/path`, `socket://...`, `//host/path`) are not
/// local and are dropped; they neither count toward nor against the root rule.
///
/// # Errors
///
/// Returns an error if the profile file or a mandatory include cannot be
/// read, or includes nest too deeply.
pub fn parse_profile(dir: &Path, name: &str) -> Result<ProfileDef> {
    let mut raw = RawProfile::default();
    let mut visited = HashSet::new();
    let file = dir.join(format!("{name}.{PROFILE_EXTENSION}"));
    read_into(dir, &file, &mut raw, 0, &mut visited)?;

    let mut roots = Vec::new();
    for root in raw.roots.iter().filter(|root| !is_remote_root(root)) {
        roots.push(resolve_local(Path::new(root))?);
    }

    let mut def = ProfileDef::new(name, roots)
        .with_paths(raw.paths.iter().map(PathBuf::from))
        .with_mountpoints(raw.mountpoints.iter().map(PathBuf::from));
    if let Some(label) = raw.label {
        def = def.with_label(label);
    }
    Ok(def)
}

fn read_into(
    dir: &Path,
    file: &Path,
    raw: &mut RawProfile,
    depth: usize,
    visited: &mut HashSet<PathBuf>,
) -> Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
        bail!("Includes nested deeper than {MAX_INCLUDE_DEPTH} at {}", file.display());
    }
    if !visited.insert(file.to_path_buf()) {
        warn!(file = %file.display(), "include cycle, skipping");
        return Ok(());
    }

    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read profile file: {}", file.display()))?;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((directive, target)) = line.split_once(char::is_whitespace)
            && matches!(directive, "include" | "include?" | "source")
        {
            let target = target.trim();
            match resolve_include(dir, target) {
                Some(path) => read_into(dir, &path, raw, depth + 1, visited)?,
                None if directive == "include?" => {
                    debug!(target, "optional include not found");
                }
                None => bail!("Included file not found: {target} (from {})", file.display()),
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "root" => raw.roots.push(value),
            "path" => raw.paths.push(value),
            "mountpoint" => raw.mountpoints.push(value),
            "label" => raw.label = Some(value),
            _ => {}
        }
    }
    Ok(())
}

fn resolve_include(dir: &Path, target: &str) -> Option<PathBuf> {
    let direct = dir.join(target);
    if direct.is_file() {
        return Some(direct);
    }
    let with_extension = dir.join(format!("{target}.{PROFILE_EXTENSION}"));
    with_extension.is_file().then_some(with_extension)
}

/// True for roots that name another host rather than a local directory.
#[must_use]
pub fn is_remote_root(root: &str) -> bool {
    root.contains("://")
        || root.starts_with("//")
        || root.starts_with("ssh:")
        || root.starts_with("socket:")
}
