//! All-or-nothing persistence of an artifact and its secrets module.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use flowsmith_core::{Artifact, FlowsmithError, Result, WrittenArtifact};

fn dir_lock(dir: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let key = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let mut locks = LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(key).or_default().clone()
}

fn stage(dir: &Path, contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(contents.as_bytes())?;
    file.as_file().sync_all()?;
    Ok(file)
}

fn backup(path: &Path, dir: &Path) -> Result<Option<NamedTempFile>> {
    if !path.is_file() {
        return Ok(None);
    }
    let copy = NamedTempFile::new_in(dir)?;
    std::fs::copy(path, copy.path())?;
    Ok(Some(copy))
}

#[cfg(unix)]
fn make_readable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_readable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Write the artifact and its secrets module into `dir`.
///
/// Both files are staged next to their destination and renamed into place.
/// If the second rename fails the secrets module is put back the way it was:
/// the previous one restored, or the new one removed. The secrets module
/// keeps the owner-only mode of the staged file.
pub fn write_artifact(artifact: &Artifact, dir: &Path) -> Result<WrittenArtifact> {
    std::fs::create_dir_all(dir)?;
    let lock = dir_lock(dir);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let path = dir.join(&artifact.file_name);
    let secrets_path = dir.join(&artifact.secrets_file_name);

    let staged_secrets = stage(dir, &artifact.secrets)?;
    let staged_main = stage(dir, &artifact.contents)?;
    // Copy of the secrets module being replaced, restored on rollback.
    let backup = backup(&secrets_path, dir)?;

    staged_secrets
        .persist(&secrets_path)
        .map_err(|e| FlowsmithError::Io(e.error))?;

    let persisted = staged_main
        .persist(&path)
        .map_err(|e| FlowsmithError::Io(e.error))
        .and_then(|_| make_readable(&path));
    if let Err(e) = persisted {
        warn!(path = %path.display(), error = %e, "Artifact write failed, rolling back");
        let restored = match backup {
            Some(previous) => previous
                .persist(&secrets_path)
                .map(|_| ())
                .map_err(|e| e.error),
            None => std::fs::remove_file(&secrets_path),
        };
        if let Err(rb) = restored {
            warn!(path = %secrets_path.display(), error = %rb, "Could not roll back secrets file");
        }
        return Err(e);
    }

    info!(
        path = %path.display(),
        secrets = %secrets_path.display(),
        "Artifact written"
    );
    Ok(WrittenArtifact {
        form: artifact.form,
        path,
        secrets_path,
        requirements: artifact.requirements.clone(),
        credential_env: artifact.credential_env.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsmith_core::TargetForm;

    fn artifact(name: &str) -> Artifact {
        Artifact {
            form: TargetForm::Script,
            file_name: format!("{}.py", name),
            contents: "print('hello')\n".into(),
            secrets_file_name: format!("{}_api_keys.py", name),
            secrets: "_MODEL_API_KEYS = {}\n".into(),
            requirements: vec!["ag2".into()],
            credential_env: vec![],
        }
    }

    #[test]
    fn test_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_artifact(&artifact("demo"), dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&written.path).unwrap(), "print('hello')\n");
        assert_eq!(
            std::fs::read_to_string(&written.secrets_path).unwrap(),
            "_MODEL_API_KEYS = {}\n"
        );
        assert_eq!(written.dir(), dir.path());
    }

    #[test]
    fn test_overwrites_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(&artifact("demo"), dir.path()).unwrap();
        let mut next = artifact("demo");
        next.contents = "print('again')\n".into();
        let written = write_artifact(&next, dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&written.path).unwrap(), "print('again')\n");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the script should go makes the final rename fail.
        std::fs::create_dir(dir.path().join("demo.py")).unwrap();
        std::fs::write(dir.path().join("demo.py").join("keep"), "x").unwrap();

        let result = write_artifact(&artifact("demo"), dir.path());
        assert!(result.is_err());
        assert!(!dir.path().join("demo_api_keys.py").exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("demo.py")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_overwrite_keeps_previous_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = artifact("demo");
        first.secrets = "_MODEL_API_KEYS = {\"m\": \"old\"}\n".into();
        write_artifact(&first, dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("demo.py")).unwrap();
        std::fs::create_dir(dir.path().join("demo.py")).unwrap();
        std::fs::write(dir.path().join("demo.py").join("keep"), "x").unwrap();

        let mut second = artifact("demo");
        second.secrets = "_MODEL_API_KEYS = {\"m\": \"new\"}\n".into();
        assert!(write_artifact(&second, dir.path()).is_err());

        assert_eq!(
            std::fs::read_to_string(dir.path().join("demo_api_keys.py")).unwrap(),
            "_MODEL_API_KEYS = {\"m\": \"old\"}\n"
        );
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                std::ffi::OsString::from("demo.py"),
                std::ffi::OsString::from("demo_api_keys.py"),
            ]
        );
    }

    #[test]
    fn test_concurrent_writes_to_same_dir() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let mut a = artifact("shared");
                    a.contents = format!("print({})\n", i);
                    write_artifact(&a, &path).map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        let contents = std::fs::read_to_string(dir.path().join("shared.py")).unwrap();
        assert!(contents.starts_with("print("));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
