use flowsmith_core::config::AppConfig;
use flowsmith_core::traits::Environment;
use flowsmith_core::EnvironmentSnapshot;
use flowsmith_runner::{ConflictChecker, ProcessEnvironment};

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub async fn run_doctor(config: &AppConfig, source: &str) {
    let mut checks = Vec::new();

    // 1. Where the config came from
    checks.push(CheckResult {
        label: "Config".into(),
        ok: true,
        detail: source.to_string(),
    });

    // 2. Interpreter launches
    checks.push(check_interpreter(config).await);

    // 3. Package listing works
    let env = ProcessEnvironment::from_config(&config.runner);
    let snapshot = match env.reload().await {
        Ok(snapshot) => {
            checks.push(CheckResult {
                label: "Packages".into(),
                ok: true,
                detail: format!("{} installed", snapshot.len()),
            });
            Some(snapshot)
        }
        Err(e) => {
            checks.push(CheckResult {
                label: "Packages".into(),
                ok: false,
                detail: e.to_string(),
            });
            None
        }
    };

    if let Some(snapshot) = &snapshot {
        // 4. Agent runtime present
        checks.push(check_runtime(config, snapshot));

        // 5. Notebook execution possible
        checks.push(check_notebook(snapshot));

        // 6. No conflicting packages
        checks.push(check_conflicts(config, snapshot));
    }

    // 7. Output dir writable
    checks.push(check_output_dir(config));

    // Print results
    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

async fn check_interpreter(config: &AppConfig) -> CheckResult {
    let python = &config.runner.python;
    let output = tokio::process::Command::new(python)
        .arg("--version")
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            // Older interpreters print the version on stderr.
            let text = if out.stdout.is_empty() { &out.stderr } else { &out.stdout };
            CheckResult {
                label: "Interpreter".into(),
                ok: true,
                detail: format!("{} ({})", python, String::from_utf8_lossy(text).trim()),
            }
        }
        Ok(out) => CheckResult {
            label: "Interpreter".into(),
            ok: false,
            detail: format!("{} exited with {}", python, out.status),
        },
        Err(e) => CheckResult {
            label: "Interpreter".into(),
            ok: false,
            detail: format!("{} ({})", python, e),
        },
    }
}

fn check_runtime(config: &AppConfig, snapshot: &EnvironmentSnapshot) -> CheckResult {
    let package = &config.compiler.runtime_package;
    match snapshot.version(package) {
        Some(version) => CheckResult {
            label: "Runtime".into(),
            ok: true,
            detail: format!("{} {}", package, version),
        },
        None => CheckResult {
            label: "Runtime".into(),
            ok: false,
            detail: format!("{} not installed (run: flowsmith install {})", package, package),
        },
    }
}

fn check_notebook(snapshot: &EnvironmentSnapshot) -> CheckResult {
    let missing: Vec<&str> = ["jupyter-core", "nbclient", "ipykernel"]
        .into_iter()
        .filter(|p| !snapshot.contains(p))
        .collect();
    if missing.is_empty() {
        CheckResult {
            label: "Notebooks".into(),
            ok: true,
            detail: "jupyter execute available".into(),
        }
    } else {
        CheckResult {
            label: "Notebooks".into(),
            ok: false,
            detail: format!("missing {} (scripts still run)", missing.join(", ")),
        }
    }
}

fn check_conflicts(config: &AppConfig, snapshot: &EnvironmentSnapshot) -> CheckResult {
    let checker = match ConflictChecker::with_config(&config.conflicts) {
        Ok(checker) => checker,
        Err(e) => {
            return CheckResult {
                label: "Conflicts".into(),
                ok: false,
                detail: e.to_string(),
            }
        }
    };
    let report = checker.check(snapshot);
    if report.is_clean() {
        CheckResult {
            label: "Conflicts".into(),
            ok: true,
            detail: format!("none ({} rules)", checker.rules().len()),
        }
    } else {
        let text: Vec<String> = report.warnings.iter().map(|w| w.to_string()).collect();
        CheckResult {
            label: "Conflicts".into(),
            ok: false,
            detail: text.join("; "),
        }
    }
}

fn check_output_dir(config: &AppConfig) -> CheckResult {
    let dir = config.output_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return CheckResult {
            label: "Output dir".into(),
            ok: false,
            detail: format!("{} (cannot create: {})", dir.display(), e),
        };
    }
    // Check writable by attempting to create a temp file
    let test_file = dir.join(".doctor_test");
    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            std::fs::remove_file(&test_file).ok();
            CheckResult {
                label: "Output dir".into(),
                ok: true,
                detail: format!("{}", dir.display()),
            }
        }
        Err(e) => CheckResult {
            label: "Output dir".into(),
            ok: false,
            detail: format!("{} (not writable: {})", dir.display(), e),
        },
    }
}
