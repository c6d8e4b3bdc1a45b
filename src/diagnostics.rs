use std::path::Path;

use crate::config::{Command, Config};

/// Preflight checks. Every failure is reported before giving up.
pub fn check(cfg: &Config, data_dir: &Path) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    if cfg.command.uses_store() {
        if let Err(e) = crate::store::validate_name(&cfg.identity) {
            errors.push(format!(
                "{e}\n  \
                 → identities may use letters, digits, '-' and '_' (at most 64)"
            ));
        }
        if let Err(e) = probe_writable(data_dir) {
            errors.push(format!(
                "data dir {} is not writable: {e}\n  \
                 → pass --data-dir or fix the directory permissions",
                data_dir.display()
            ));
        }
    }

    if matches!(cfg.command, Command::Link { .. }) {
        if let Err(e) = std::process::Command::new(&cfg.pinentry)
            .arg("--version")
            .output()
        {
            errors.push(format!(
                "pinentry binary not found: '{}': {e}\n  \
                 → install pinentry or pass --pinentry <path>",
                cfg.pinentry
            ));
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".keylink-probe");
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)
}
