use crate::AutosyncContext;
use crate::config::profiles::{PrfLoader, ProfileLoader};
use crate::profile::ProfileDef;
use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Execute profiles command - list loadable profiles and their overlaps
///
/// # Errors
///
/// Returns an error if the profile directory cannot be read
pub fn execute(ctx: &AutosyncContext) -> Result<()> {
    let loader = PrfLoader::new(ctx.profile_dir()?);
    let defs = loader.load()?;

    if defs.is_empty() {
        super::print_info(&format!("No valid profiles in {}", loader.dir().display()));
        return Ok(());
    }

    for def in &defs {
        if def.label == def.name {
            println!("{}", def.name.bold());
        } else {
            println!("{} ({})", def.label.bold(), def.name);
        }
        for path in def.monitored_paths() {
            println!("    {}", path.display());
        }
        for mountpoint in &def.mountpoints {
            println!("    {} {}", "mountpoint".dimmed(), mountpoint.display());
        }
    }

    let overlaps = overlapping_pairs(&defs);
    println!();
    if overlaps.is_empty() {
        super::print_success(&format!("{} profile(s), none overlapping", defs.len()));
    } else {
        for (a, b, shared) in &overlaps {
            let shared: Vec<String> = shared.iter().map(|p| p.display().to_string()).collect();
            super::print_warning(&format!(
                "{a} and {b} share {}; they will never sync at the same time",
                shared.join(", ")
            ));
        }
    }
    Ok(())
}

/// Every pair of profiles that share a monitored path, with the shared paths
#[must_use]
pub fn overlapping_pairs(defs: &[ProfileDef]) -> Vec<(String, String, BTreeSet<PathBuf>)> {
    let monitored: Vec<BTreeSet<PathBuf>> = defs.iter().map(ProfileDef::monitored_paths).collect();

    let mut pairs = Vec::new();
    for (i, a) in defs.iter().enumerate() {
        for (j, b) in defs.iter().enumerate().skip(i + 1) {
            let shared: BTreeSet<PathBuf> = monitored[i].intersection(&monitored[j]).cloned().collect();
            if !shared.is_empty() {
                pairs.push((a.name.clone(), b.name.clone(), shared));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_pairs_reports_shared_paths() {
        let defs = vec![
            ProfileDef::new("a", ["/data/shared", "/data/a"]),
            ProfileDef::new("b", ["/data/shared"]),
            ProfileDef::new("c", ["/data/c"]),
        ];
        let pairs = overlapping_pairs(&defs);
        assert_eq!(pairs.len(), 1);
        let (a, b, shared) = &pairs[0];
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
        assert_eq!(shared, &BTreeSet::from([PathBuf::from("/data/shared")]));
    }

    #[test]
    fn test_subpaths_decide_overlap() {
        let defs = vec![
            ProfileDef::new("docs", ["/home/u"]).with_paths(["Documents"]),
            ProfileDef::new("music", ["/home/u"]).with_paths(["Music"]),
        ];
        assert!(overlapping_pairs(&defs).is_empty());
    }
}
