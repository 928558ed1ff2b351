//! Applies mitigation patch operations to a materialized variant tree.

use std::fs;
use std::path::{Component, Path, PathBuf};

use luabench_core::{BuildFlags, PatchError, PatchOperation};
use tracing::debug;

/// Resolve a tree-relative target, rejecting anything that would escape it.
pub fn resolve(tree: &Path, target: &Path) -> Result<PathBuf, PatchError> {
    let escapes = target.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || target.as_os_str().is_empty() {
        return Err(PatchError::OutsideTree(target.to_path_buf()));
    }
    Ok(tree.join(target))
}

fn read(path: &Path, target: &Path) -> Result<String, PatchError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            PatchError::MissingTarget(target.to_path_buf())
        } else {
            PatchError::Io {
                target: target.to_path_buf(),
                source,
            }
        }
    })
}

fn write(path: &Path, target: &Path, contents: &str) -> Result<(), PatchError> {
    let io = |source| PatchError::Io {
        target: target.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, contents).map_err(io)
}

/// What applying an operation to the current tree would do.
#[derive(Debug, PartialEq, Eq)]
enum Plan {
    Write(String),
    AlreadyApplied,
    FlagsOnly,
}

fn new_file_plan(path: &Path, target: &Path, contents: &str) -> Result<Plan, PatchError> {
    if !path.exists() {
        return Ok(Plan::Write(contents.to_string()));
    }
    if read(path, target)? == contents {
        Ok(Plan::AlreadyApplied)
    } else {
        Err(PatchError::Conflict {
            target: target.to_path_buf(),
            reason: "file already exists with different contents".to_string(),
        })
    }
}

fn plan(tree: &Path, op: &PatchOperation) -> Result<Plan, PatchError> {
    match op {
        PatchOperation::ReplaceFile { target, contents } => {
            let current = read(&resolve(tree, target)?, target)?;
            if current == *contents {
                Ok(Plan::AlreadyApplied)
            } else {
                Ok(Plan::Write(contents.clone()))
            }
        }
        PatchOperation::AddFile { target, contents } => {
            new_file_plan(&resolve(tree, target)?, target, contents)
        }
        PatchOperation::InjectHeader { header, contents } => {
            new_file_plan(&resolve(tree, header)?, header, contents)
        }
        PatchOperation::Substitute {
            target,
            find,
            replace,
        } => {
            let current = read(&resolve(tree, target)?, target)?;
            if !replace.is_empty() && current.contains(replace.as_str()) {
                Ok(Plan::AlreadyApplied)
            } else if current.contains(find.as_str()) {
                Ok(Plan::Write(current.replacen(find.as_str(), replace, 1)))
            } else {
                Err(PatchError::Conflict {
                    target: target.clone(),
                    reason: "substitution text not found".to_string(),
                })
            }
        }
        PatchOperation::SetBuildFlag { .. } => Ok(Plan::FlagsOnly),
    }
}

/// Check every operation against `tree` without writing anything.
pub fn validate(tree: &Path, ops: &[PatchOperation]) -> Result<(), PatchError> {
    for op in ops {
        plan(tree, op)?;
    }
    Ok(())
}

/// Apply `ops` in order and return the flags they contribute to the build.
///
/// Re-applying an operation the tree already carries is a no-op.
pub fn apply(tree: &Path, ops: &[PatchOperation]) -> Result<BuildFlags, PatchError> {
    validate(tree, ops)?;

    let mut flags = BuildFlags::default();
    for op in ops {
        match plan(tree, op)? {
            Plan::Write(contents) => {
                if let Some(target) = op.target() {
                    write(&resolve(tree, target)?, target, &contents)?;
                }
            }
            Plan::AlreadyApplied => {
                debug!(op = op.kind(), target = ?op.target(), "patch already applied");
            }
            Plan::FlagsOnly => {}
        }

        match op {
            PatchOperation::InjectHeader { header, .. } => {
                flags
                    .includes
                    .push(format!("-include {}", resolve(tree, header)?.display()));
            }
            PatchOperation::SetBuildFlag { flag } => flags.cflags.push(flag.clone()),
            _ => {}
        }
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }
        dir
    }

    fn substitute(find: &str, replace: &str) -> PatchOperation {
        PatchOperation::Substitute {
            target: PathBuf::from("src/lapi.c"),
            find: find.to_string(),
            replace: replace.to_string(),
        }
    }

    #[test]
    fn test_substitute_applies_first_occurrence() {
        let tree = tree_with(&[("src/lapi.c", "mode = \"bt\"; mode = \"bt\";")]);
        apply(tree.path(), &[substitute("\"bt\"", "\"t\"")]).expect("apply");
        let contents = fs::read_to_string(tree.path().join("src/lapi.c")).unwrap();
        assert_eq!(contents, "mode = \"t\"; mode = \"bt\";");
    }

    #[test]
    fn test_substitute_is_idempotent() {
        let tree = tree_with(&[("src/lapi.c", "checkmode(L, mode, \"binary\");")]);
        let op = substitute("checkmode(L, mode,", "checkmode(L, \"t\",");
        apply(tree.path(), &[op.clone()]).expect("first apply");
        apply(tree.path(), &[op]).expect("second apply");
        let contents = fs::read_to_string(tree.path().join("src/lapi.c")).unwrap();
        assert_eq!(contents, "checkmode(L, \"t\", \"binary\");");
    }

    #[test]
    fn test_substitute_conflict_when_text_missing() {
        let tree = tree_with(&[("src/lapi.c", "unrelated")]);
        let err = apply(tree.path(), &[substitute("needle", "thread")]).expect_err("conflict");
        assert!(matches!(err, PatchError::Conflict { .. }));
    }

    #[test]
    fn test_replace_file_requires_existing_target() {
        let tree = tree_with(&[]);
        let op = PatchOperation::ReplaceFile {
            target: PathBuf::from("src/missing.c"),
            contents: "int x;".to_string(),
        };
        let err = apply(tree.path(), &[op]).expect_err("missing target");
        assert!(matches!(err, PatchError::MissingTarget(p) if p == Path::new("src/missing.c")));
    }

    #[test]
    fn test_add_file_conflict_and_idempotence() {
        let tree = tree_with(&[("runner.lua", "old")]);
        let same = PatchOperation::AddFile {
            target: PathBuf::from("runner.lua"),
            contents: "old".to_string(),
        };
        apply(tree.path(), &[same]).expect("identical add is a no-op");

        let different = PatchOperation::AddFile {
            target: PathBuf::from("runner.lua"),
            contents: "new".to_string(),
        };
        let err = apply(tree.path(), &[different]).expect_err("conflict");
        assert!(matches!(err, PatchError::Conflict { .. }));
    }

    #[test]
    fn test_validation_happens_before_any_write() {
        let tree = tree_with(&[]);
        let ops = vec![
            PatchOperation::AddFile {
                target: PathBuf::from("src/new.h"),
                contents: "#define X 1".to_string(),
            },
            PatchOperation::ReplaceFile {
                target: PathBuf::from("src/gone.c"),
                contents: String::new(),
            },
        ];
        assert!(apply(tree.path(), &ops).is_err());
        assert!(!tree.path().join("src/new.h").exists());
    }

    #[test]
    fn test_inject_header_and_flags() {
        let tree = tree_with(&[]);
        let ops = vec![
            PatchOperation::InjectHeader {
                header: PathBuf::from("src/wrapper.h"),
                contents: "#define system system_sandbox".to_string(),
            },
            PatchOperation::SetBuildFlag {
                flag: "-DLUAJIT_DISABLE_FFI".to_string(),
            },
        ];
        let flags = apply(tree.path(), &ops).expect("apply");

        let header = tree.path().join("src/wrapper.h");
        assert!(header.exists());
        assert_eq!(flags.includes, vec![format!("-include {}", header.display())]);
        assert_eq!(flags.cflags, vec!["-DLUAJIT_DISABLE_FFI".to_string()]);

        // A second pass yields the same flags.
        assert_eq!(apply(tree.path(), &ops).expect("reapply"), flags);
    }

    #[test]
    fn test_targets_cannot_escape_tree() {
        let tree = tree_with(&[]);
        let op = PatchOperation::AddFile {
            target: PathBuf::from("../escape.txt"),
            contents: "x".to_string(),
        };
        let err = apply(tree.path(), &[op]).expect_err("escape");
        assert!(matches!(err, PatchError::OutsideTree(_)));

        let absolute = resolve(tree.path(), Path::new("/etc/passwd"));
        assert!(matches!(absolute, Err(PatchError::OutsideTree(_))));
    }
}
