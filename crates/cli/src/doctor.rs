//! `cm doctor`: checks config validity and data-root writability. No
//! interactive wizard — onboarding flows are out of scope here.

use cm_domain::config::Config;

fn print_check(label: &str, ok: bool, detail: &str) {
    let mark = if ok { "OK  " } else { "FAIL" };
    println!("  [{mark}] {label}: {detail}");
}

/// Runs every check and prints a summary. Returns `true` when every check
/// passed.
pub fn run(config: &Config, config_path: &std::path::Path) -> bool {
    println!("codemie-core doctor");
    println!("====================\n");

    let mut all_passed = true;

    let config_exists = config_path.exists();
    print_check(
        "Config file exists",
        config_exists,
        &if config_exists { config_path.display().to_string() } else { format!("{} not found (using defaults)", config_path.display()) },
    );

    let issues = config.validate();
    print_check("Config validation", issues.is_empty(), &if issues.is_empty() { "no issues".to_string() } else { format!("{} issue(s)", issues.len()) });
    for issue in &issues {
        println!("        {issue}");
        all_passed = false;
    }

    let data_root = std::path::Path::new(&config.data_root);
    let data_root_ok = std::fs::create_dir_all(data_root).is_ok() && data_root.metadata().map(|m| !m.permissions().readonly()).unwrap_or(false);
    print_check("Data root writable", data_root_ok, &config.data_root);
    if !data_root_ok {
        all_passed = false;
    }

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    all_passed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_for_default_config_with_writable_data_root() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_root = tmp.path().to_string_lossy().into_owned();
        assert!(run(&config, &tmp.path().join("config.toml")));
    }

    #[test]
    fn fails_for_invalid_sso_config() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_root = tmp.path().to_string_lossy().into_owned();
        config.provider.kind = cm_domain::config::ProviderKind::Sso;
        config.provider.base_url = String::new();
        assert!(!run(&config, &tmp.path().join("config.toml")));
    }
}
