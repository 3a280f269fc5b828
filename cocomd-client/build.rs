//! Stamps the binary with GIT_HASH, BUILD_TIMESTAMP and BUILD_PROFILE
//! for the startup banner.

use std::process::Command;

use chrono::{SecondsFormat, Utc};

/// Short commit id, or "unknown" outside a checkout
fn git_hash() -> String {
    let Ok(output) = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output() else {
        return "unknown".to_string();
    };
    match String::from_utf8(output.stdout) {
        Ok(hash) if output.status.success() && !hash.trim().is_empty() => hash.trim().to_string(),
        _ => "unknown".to_string(),
    }
}

fn main() {
    let stamp = [
        ("GIT_HASH", git_hash()),
        ("BUILD_TIMESTAMP", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("BUILD_PROFILE", std::env::var("PROFILE").unwrap_or_else(|_| "unknown".into())),
    ];
    for (key, value) in stamp {
        println!("cargo:rustc-env={key}={value}");
    }

    // Workspace checkout lives one level up
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
