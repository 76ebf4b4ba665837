//! POSIX shell rendering of a published snapshot.
//!
//! The output is meant to be sourced from `/etc/profile.d`. Sourcing it any
//! number of times gives the same environment: variables are plain
//! assignments and each PATH fragment is only prepended when missing.

use super::PublishedEnvironment;
use std::path::Path;

/// Render `published` as a POSIX shell fragment.
pub fn render_profile(published: &PublishedEnvironment) -> String {
    let mut out = String::new();
    out.push_str("# Generated by podboot. Do not edit.\n");
    out.push_str(&format!(
        "# snapshot version {} digest {}\n",
        published.version, published.digest
    ));
    out.push_str(&format!(
        "PODBOOT_ENV_DIGEST={}\nexport PODBOOT_ENV_DIGEST\n",
        quote(&published.digest)
    ));

    for (key, value) in &published.vars {
        out.push_str(&format!("{}={}\nexport {}\n", key, quote(value), key));
    }

    // Walk fragments backwards so the first fragment ends up first on PATH.
    for fragment in published.path.iter().rev() {
        let q = quote(fragment);
        out.push_str(&format!(
            "case \":${{PATH}}:\" in\n  *:{q}:*) ;;\n  *) PATH={q}\"${{PATH:+:$PATH}}\" ;;\nesac\n"
        ));
    }
    if !published.path.is_empty() {
        out.push_str("export PATH\n");
    }

    out
}

/// Render the `/etc/profile.d` hook that sources `profile` when it is readable.
///
/// The hook never changes with the snapshot, so it is written once and login
/// shells always pick up the latest publication.
pub fn render_profile_hook(profile: &Path) -> String {
    let q = quote(&profile.to_string_lossy());
    format!("# Generated by podboot. Do not edit.\nif [ -r {q} ]; then\n  . {q}\nfi\n")
}

/// Single-quote `value` for POSIX sh.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvironmentSnapshot;
    use std::process::Command;

    fn published() -> PublishedEnvironment {
        let mut snap = EnvironmentSnapshot::new();
        snap.set("API_KEY", "it's $secret").unwrap();
        snap.prepend_path("/opt/first/bin").unwrap();
        snap.prepend_path("/opt/second bin").unwrap();
        snap.to_published()
    }

    fn source_twice(profile: &str) -> String {
        let script = format!(
            "PATH=/usr/bin:/bin\n{profile}\n{profile}\nprintf '%s\\n%s' \"$PATH\" \"$API_KEY\""
        );
        let out = Command::new("/bin/sh").arg("-c").arg(script).output().unwrap();
        assert!(out.status.success());
        String::from_utf8(out.stdout).unwrap()
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("a'b"), r"'a'\''b'");
    }

    #[test]
    fn test_hook_sources_profile_and_tolerates_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let profile = dir.path().join("environment.sh");
        let hook = render_profile_hook(&profile);

        let run = |hook: &str| {
            let out = Command::new("/bin/sh")
                .arg("-c")
                .arg(format!("{hook}\nprintf '%s' \"$API_KEY\""))
                .env_remove("API_KEY")
                .output()
                .unwrap();
            assert!(out.status.success());
            String::from_utf8(out.stdout).unwrap()
        };

        assert_eq!(run(&hook), "");
        std::fs::write(&profile, render_profile(&published())).unwrap();
        assert_eq!(run(&hook), "it's $secret");
    }

    #[test]
    fn test_resourcing_does_not_duplicate_path() {
        let profile = render_profile(&published());
        let out = source_twice(&profile);
        let mut lines = out.lines();
        assert_eq!(
            lines.next().unwrap(),
            "/opt/first/bin:/opt/second bin:/usr/bin:/bin"
        );
        assert_eq!(lines.next().unwrap(), "it's $secret");
    }
}
