//! Finds modules on disk and compiles a program with everything it
//! `#request`s.
//!
//! A module named `io.files` lives at `io/files.cin` below one of the search
//! directories. Exactly one directory may provide it.

use crate::bytecode::ModuleInfo;
use crate::compiler::{compile, CompileError};
use crate::frontend::lexer::{tokenize, LexError};
use crate::frontend::token::TokenList;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
    pub search_dirs: Vec<PathBuf>,
    /// Source file extension, without the dot.
    pub extension: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        LocatorConfig {
            search_dirs: vec![PathBuf::from(".")],
            extension: "cin".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("module '{name}' not found in {searched} search directories")]
    NotFound { name: String, searched: usize },
    #[error("module '{name}' is ambiguous: {}", display_paths(.candidates))]
    Ambiguous {
        name: String,
        candidates: Vec<PathBuf>,
    },
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}:{source}", .path.display())]
    Lex { path: PathBuf, source: LexError },
    #[error("{}:{source}", .path.display())]
    Compile {
        path: PathBuf,
        source: CompileError,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default)]
pub struct ModuleLocator {
    config: LocatorConfig,
}

impl ModuleLocator {
    pub fn new(config: LocatorConfig) -> Self {
        ModuleLocator { config }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    fn relative_path(&self, name: &str) -> PathBuf {
        let mut path: PathBuf = name.split('.').collect();
        path.set_extension(&self.config.extension);
        path
    }

    pub fn locate(&self, name: &str) -> Result<PathBuf, LocatorError> {
        let relative = self.relative_path(name);
        let mut candidates: Vec<PathBuf> = Vec::new();
        for dir in &self.config.search_dirs {
            let path = dir.join(&relative);
            if !path.is_file() {
                continue;
            }
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            if !candidates.contains(&canonical) {
                candidates.push(canonical);
            }
        }

        match candidates.len() {
            0 => Err(LocatorError::NotFound {
                name: name.to_string(),
                searched: self.config.search_dirs.len(),
            }),
            1 => Ok(candidates.remove(0)),
            _ => Err(LocatorError::Ambiguous {
                name: name.to_string(),
                candidates,
            }),
        }
    }

    pub fn load_tokens(&self, path: &Path) -> Result<TokenList, LocatorError> {
        let source = std::fs::read_to_string(path).map_err(|source| LocatorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tokenize(&source).map_err(|source| LocatorError::Lex {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn compile_file(&self, path: &Path, name: &str) -> Result<ModuleInfo, LocatorError> {
        let tokens = self.load_tokens(path)?;
        compile(tokens, name).map_err(|source| LocatorError::Compile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Compiles the file at `root` and every module it transitively
    /// requests. The root comes first so it lands on page 0; each module
    /// appears once.
    pub fn compile_with_dependencies(&self, root: &Path) -> Result<Vec<ModuleInfo>, LocatorError> {
        let name = root
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());

        let mut seen = HashSet::new();
        seen.insert(name.clone());
        let mut modules = vec![self.compile_file(root, &name)?];

        let mut next = 0;
        while next < modules.len() {
            let requested = modules[next].required_modules.clone();
            for dependency in requested {
                if !seen.insert(dependency.clone()) {
                    warn!(module = %dependency, by = %modules[next].name, "module requested again");
                    continue;
                }
                let path = self.locate(&dependency)?;
                debug!(module = %dependency, path = %path.display(), "loading module");
                modules.push(self.compile_file(&path, &dependency)?);
            }
            next += 1;
        }
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, source: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, source).unwrap();
        path
    }

    fn locator(dirs: &[&Path]) -> ModuleLocator {
        ModuleLocator::new(LocatorConfig {
            search_dirs: dirs.iter().map(|d| d.to_path_buf()).collect(),
            ..LocatorConfig::default()
        })
    }

    #[test]
    fn test_dotted_names_map_to_directories() {
        let dir = TempDir::new().unwrap();
        let expected = write(dir.path(), "io/files.cin", "nop\n");
        let found = locator(&[dir.path()]).locate("io.files").unwrap();
        assert_eq!(found, expected.canonicalize().unwrap());
    }

    #[test]
    fn test_missing_and_ambiguous() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write(a.path(), "math.cin", "nop\n");
        write(b.path(), "math.cin", "nop\n");

        let loc = locator(&[a.path(), b.path()]);
        assert!(matches!(loc.locate("nothing"), Err(LocatorError::NotFound { .. })));
        match loc.locate("math") {
            Err(LocatorError::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_same_directory_listed_twice_is_not_ambiguous() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "math.cin", "nop\n");
        assert!(locator(&[dir.path(), dir.path()]).locate("math").is_ok());
    }

    #[test]
    fn test_dependencies_loaded_once_root_first() {
        let dir = TempDir::new().unwrap();
        let root = write(
            dir.path(),
            "app.cin",
            "#request util\n#request io.out\ncall : util.go\nexit\n",
        );
        write(dir.path(), "util.cin", "#request io.out\n#scope util\n#label go\nret\n#end\n");
        write(dir.path(), "io/out.cin", "nop\n");

        let modules = locator(&[dir.path()])
            .compile_with_dependencies(&root)
            .unwrap();
        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["app", "util", "io.out"]);
    }

    #[test]
    fn test_errors_carry_the_path() {
        let dir = TempDir::new().unwrap();
        let root = write(dir.path(), "bad.cin", "nop\nmovv : $ac\n");
        let err = locator(&[dir.path()])
            .compile_with_dependencies(&root)
            .unwrap_err();
        assert!(matches!(err, LocatorError::Compile { .. }));
        assert!(err.to_string().ends_with("2:1: unknown instruction 'movv'"));

        let missing = dir.path().join("absent.cin");
        assert!(matches!(
            locator(&[dir.path()]).load_tokens(&missing),
            Err(LocatorError::Io { .. })
        ));
    }
}
