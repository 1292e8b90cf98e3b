//! Attack script lookup and helper-library staging.
//!
//! Attacks are named after their script: `wiener` resolves to
//! `<attacks_dir>/wiener.sage` (or the next configured extension). A name
//! that is itself an existing file is used as-is.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::AttackError;

/// Helper library imported by attack scripts.
pub const HELPER_SOURCE: &str = include_str!("../../assets/attack.py");

/// File name the helper library is staged under.
pub const HELPER_FILE: &str = "attack.py";

/// Largest Damerau-Levenshtein distance still offered as a suggestion.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// A resolved attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackScript {
    /// Name as requested.
    pub name: String,
    pub path: PathBuf,
}

/// Attack scripts available in a directory.
#[derive(Debug, Clone)]
pub struct Catalog {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl Catalog {
    /// Creates a catalog over `dir`, trying `extensions` in order.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            extensions,
        }
    }

    /// Resolves an attack name to its script.
    ///
    /// # Errors
    ///
    /// Returns `AttackError::UnknownAttack`, with the closest known name when
    /// one is near enough.
    pub fn resolve(&self, name: &str) -> Result<AttackScript, AttackError> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(AttackScript {
                name: name.to_string(),
                path: direct.to_path_buf(),
            });
        }
        for ext in &self.extensions {
            let path = self.dir.join(format!("{name}.{ext}"));
            if path.is_file() {
                return Ok(AttackScript {
                    name: name.to_string(),
                    path,
                });
            }
        }
        Err(AttackError::UnknownAttack {
            name: name.to_string(),
            suggestion: self.suggest(name),
        })
    }

    /// Names of every attack in the catalog, sorted.
    ///
    /// # Errors
    ///
    /// Returns `AttackError::Catalog` if the directory cannot be listed.
    pub fn list(&self) -> Result<Vec<String>, AttackError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| AttackError::Catalog {
            path: self.dir.clone(),
            source,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| self.extensions.iter().any(|x| x == e))
            })
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Suggests a similar attack name for typo correction.
    #[must_use]
    pub fn suggest(&self, input: &str) -> Option<String> {
        let names = self.list().ok()?;
        closest(input, names.iter().map(String::as_str))
    }
}

/// Returns the closest candidate within the suggestion distance.
#[must_use]
pub fn closest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .map(|name| (name, strsim::damerau_levenshtein(input, name)))
        .filter(|(_, dist)| *dist <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name.to_string())
}

/// The helper library copied into a scratch directory for one run.
///
/// The directory is removed when this value is dropped.
#[derive(Debug)]
pub struct StagedHelper {
    dir: TempDir,
}

impl StagedHelper {
    /// Writes the helper library into a fresh scratch directory.
    ///
    /// # Errors
    ///
    /// Returns `AttackError::Staging` if the directory or file cannot be
    /// created.
    pub fn stage() -> Result<Self, AttackError> {
        let dir = tempfile::Builder::new()
            .prefix("rsarmageddon-")
            .tempdir()
            .map_err(AttackError::Staging)?;
        std::fs::write(dir.path().join(HELPER_FILE), HELPER_SOURCE).map_err(AttackError::Staging)?;
        tracing::debug!(dir = %dir.path().display(), "attack helper staged");
        Ok(Self { dir })
    }

    /// Directory to put on the engine's module search path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(files: &[&str]) -> (TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "").unwrap();
        }
        let catalog = Catalog::new(dir.path(), vec!["sage".into(), "py".into()]);
        (dir, catalog)
    }

    #[test]
    fn resolves_by_extension_order() {
        let (dir, catalog) = catalog_with(&["wiener.py", "wiener.sage", "fermat.py"]);
        assert_eq!(
            catalog.resolve("wiener").unwrap().path,
            dir.path().join("wiener.sage")
        );
        assert_eq!(
            catalog.resolve("fermat").unwrap().path,
            dir.path().join("fermat.py")
        );
    }

    #[test]
    fn resolves_direct_path() {
        let (dir, catalog) = catalog_with(&["custom.txt"]);
        let path = dir.path().join("custom.txt");
        let script = catalog.resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(script.path, path);
    }

    #[test]
    fn unknown_attack_gets_suggestion() {
        let (_dir, catalog) = catalog_with(&["wiener.sage", "hastad.sage"]);
        let err = catalog.resolve("weiner").unwrap_err();
        let AttackError::UnknownAttack { name, suggestion } = err else {
            panic!("expected unknown attack");
        };
        assert_eq!(name, "weiner");
        assert_eq!(suggestion.as_deref(), Some("wiener"));
    }

    #[test]
    fn far_names_get_no_suggestion() {
        assert_eq!(closest("boneh_durfee", ["wiener", "fermat"]), None);
    }

    #[test]
    fn list_filters_extensions() {
        let (_dir, catalog) = catalog_with(&["b.sage", "a.py", "a.sage", "notes.md"]);
        assert_eq!(catalog.list().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn missing_catalog_lists_error() {
        let catalog = Catalog::new("/nonexistent/rsarmageddon/attacks", vec!["sage".into()]);
        assert!(matches!(catalog.list(), Err(AttackError::Catalog { .. })));
        assert!(matches!(
            catalog.resolve("wiener"),
            Err(AttackError::UnknownAttack { suggestion: None, .. })
        ));
    }

    #[test]
    fn staged_helper_is_removed_on_drop() {
        let staged = StagedHelper::stage().unwrap();
        let dir = staged.path().to_path_buf();
        let helper = std::fs::read_to_string(dir.join(HELPER_FILE)).unwrap();
        assert!(helper.contains("def cleartext"));
        drop(staged);
        assert!(!dir.exists());
    }

    #[test]
    fn helper_keeps_colons_in_ciphertext_labels() {
        let staged = StagedHelper::stage().unwrap();
        let output = match std::process::Command::new("python3")
            .arg("-c")
            .arg(
                "import attack\n\
                 c, k = attack.parse_args(['7:out:v2.bin', '35:5:alice', '9:'])\n\
                 print(c)\nprint(k)",
            )
            .env("PYTHONPATH", staged.path())
            .output()
        {
            Ok(output) => output,
            // No interpreter on this host.
            Err(_) => return,
        };
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            "[(7, 'out:v2.bin'), (9, None)]\n[(35, 5, 'alice')]\n"
        );
    }
}
