//! Materialization of isolated variant trees.

use std::fs;
use std::io;
use std::path::Path;

/// Recursively copy `src` into `dst`, skipping VCS metadata.
///
/// `dst` is removed first so a tree left over from an interrupted build
/// never leaks half-applied patches into a new one.
pub fn materialize(src: &Path, dst: &Path) -> io::Result<u64> {
    if dst.exists() {
        fs::remove_dir_all(dst)?;
    }
    fs::create_dir_all(dst)?;
    copy_recursive(src, dst)
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" || name == ".hg" {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let link = fs::read_link(&from)?;
            std::os::unix::fs::symlink(link, &to)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&to)?;
            copied += copy_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_copies_nested_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("src")).unwrap();
        fs::write(src.path().join("Makefile"), "all:").unwrap();
        fs::write(src.path().join("src/lua.c"), "int main;").unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref").unwrap();

        let out = tempfile::tempdir().unwrap();
        let dst = out.path().join("lua-5.4.6-abc");
        let copied = materialize(src.path(), &dst).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("src/lua.c")).unwrap(), "int main;");
        assert!(!dst.join(".git").exists());
    }

    #[test]
    fn test_materialize_replaces_stale_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("lua.c"), "fresh").unwrap();

        let out = tempfile::tempdir().unwrap();
        let dst = out.path().join("variant");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("leftover.h"), "stale").unwrap();

        materialize(src.path(), &dst).unwrap();
        assert!(!dst.join("leftover.h").exists());
        assert!(dst.join("lua.c").exists());
    }

    #[test]
    fn test_materialize_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("build.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let out = tempfile::tempdir().unwrap();
        let dst = out.path().join("variant");
        materialize(src.path(), &dst).unwrap();

        let mode = fs::metadata(dst.join("build.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
