//! Build script for hubspoke-engine
//!
//! Stamps the binary with the commit and build time shown by `hubspoke --version`.

use std::process::Command;

use chrono::{SecondsFormat, Utc};

/// Set by release pipelines that build from a source archive without `.git`
const GIT_HASH_OVERRIDE: &str = "HUBSPOKE_GIT_HASH";

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    let git_hash = std::env::var(GIT_HASH_OVERRIDE)
        .ok()
        .or_else(|| {
            let hash = git(&["rev-parse", "--short", "HEAD"])?;
            let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
            Some(if dirty { format!("{}-dirty", hash) } else { hash })
        })
        .unwrap_or_else(|| "unknown".to_string());

    let build_time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);
    println!("cargo:rerun-if-env-changed={}", GIT_HASH_OVERRIDE);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
