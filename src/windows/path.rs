//! Executable path resolution for Windows process creation
//!
//! `CreateProcessW` does no `PATH` search, infers no extension, and resolves
//! a relative application name against the *parent's* current directory
//! rather than the child's. The helpers here do that work up front.
//!
//! Path strings follow Windows rules (`\` and `/` are both separators, `C:`
//! prefixes, `\\server\share` UNC roots) regardless of the host platform,
//! so they are usable and testable everywhere. Only `look_path` touches the
//! filesystem.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Extensions tried when `PATHEXT` is unset
const DEFAULT_PATH_EXT: [&str; 4] = [".com", ".exe", ".bat", ".cmd"];

fn is_slash(c: u8) -> bool {
    c == b'\\' || c == b'/'
}

fn is_drive_letter(c: u8) -> bool {
    c.is_ascii_alphabetic()
}

/// Whether `path` contains a directory separator or drive colon
pub fn has_separator(path: &str) -> bool {
    path.bytes().any(|c| is_slash(c) || c == b':')
}

/// Whether `path` starts with `\\` (UNC or device path)
pub fn is_unc(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() > 2 && is_slash(b[0]) && is_slash(b[1])
}

/// Length of the volume prefix: `C:` or `\\server\share`
pub fn volume_name_len(path: &str) -> usize {
    let b = path.as_bytes();
    if b.len() >= 2 && b[1] == b':' && is_drive_letter(b[0]) {
        return 2;
    }
    if is_unc(path) && !is_slash(b[2]) && b[2] != b'.' {
        // \\server\share
        let mut n = 3;
        while n < b.len() && !is_slash(b[n]) {
            n += 1;
        }
        n += 1;
        while n < b.len() && !is_slash(b[n]) {
            n += 1;
        }
        return n.min(b.len());
    }
    0
}

/// Whether `path` is fully qualified: `C:\...` or UNC
pub fn is_abs(path: &str) -> bool {
    let vol = volume_name_len(path);
    if vol == 0 {
        return false;
    }
    if is_unc(path) {
        return true;
    }
    path.as_bytes().get(vol).copied().map_or(false, is_slash)
}

/// Normalize separators to `\` and resolve `.` and `..` components.
///
/// The volume prefix is kept as is; `..` never climbs above the root.
pub fn clean(path: &str) -> String {
    let vol = volume_name_len(path);
    let (volume, rest) = path.split_at(vol);
    let rooted = rest.as_bytes().first().copied().map_or(false, is_slash);

    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split(['\\', '/']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().map_or(false, |p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }

    let mut out = volume.replace('/', "\\");
    if rooted {
        out.push('\\');
    }
    out.push_str(&parts.join("\\"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Join two Windows path fragments and clean the result
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return clean(name);
    }
    clean(&format!("{}\\{}", dir, name))
}

/// Resolve `path` to an absolute, cleaned path.
///
/// Drive-relative paths (`D:foo`) are taken relative to the root of that
/// drive; other relative paths are taken relative to the current directory.
pub fn full_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    if is_abs(path) {
        return Ok(clean(path));
    }
    let b = path.as_bytes();
    if volume_name_len(path) == 2 {
        // D:foo
        return Ok(clean(&format!("{}\\{}", &path[..2], &path[2..])));
    }
    let cwd = env::current_dir()
        .map_err(|e| Error::InvalidPath(format!("{}: {}", path, e)))?
        .to_string_lossy()
        .into_owned();
    if is_slash(b[0]) {
        let vol = volume_name_len(&cwd);
        return Ok(clean(&format!("{}{}", &cwd[..vol], path)));
    }
    Ok(join(&cwd, path))
}

/// Make `dir` absolute; UNC working directories are rejected.
pub fn normalize_dir(dir: &str) -> Result<String> {
    let full = full_path(dir)?;
    if is_unc(&full) {
        return Err(Error::InvalidPath(format!(
            "{}: UNC working directory is not supported",
            dir
        )));
    }
    if volume_name_len(&full) != 2 {
        return Err(Error::InvalidPath(format!(
            "{}: working directory has no drive letter",
            dir
        )));
    }
    Ok(full)
}

/// Qualify executable path `p` against the child's working directory `dir`.
///
/// Needed because `CreateProcessW` resolves a relative application name
/// against the parent's current directory.
pub fn join_exe_dir_and_fname(dir: &str, p: &str) -> Result<String> {
    let b = p.as_bytes();
    if b.is_empty() {
        return Err(Error::InvalidPath("empty executable path".to_string()));
    }
    if is_unc(p) {
        return Ok(p.to_string());
    }
    if b.len() > 1 && b[1] == b':' {
        if b.len() == 2 {
            return Err(Error::InvalidPath(format!("{}: bare drive letter", p)));
        }
        if is_slash(b[2]) {
            return Ok(p.to_string());
        }
        let d = normalize_dir(dir)?;
        if b[0].eq_ignore_ascii_case(&d.as_bytes()[0]) {
            return full_path(&format!("{}\\{}", d, &p[2..]));
        }
        return full_path(p);
    }

    let d = normalize_dir(dir)?;
    if is_slash(b[0]) {
        full_path(&format!("{}{}", &d[..2], p))
    } else {
        full_path(&format!("{}\\{}", d, p))
    }
}

/// Extensions executable search appends, lowercased with leading dots
pub fn path_ext() -> Vec<String> {
    match env::var("PATHEXT") {
        Ok(value) => parse_path_ext(&value),
        Err(_) => DEFAULT_PATH_EXT.iter().map(|e| e.to_string()).collect(),
    }
}

/// Split a `PATHEXT` value
pub fn parse_path_ext(value: &str) -> Vec<String> {
    let exts: Vec<String> = value
        .split(';')
        .filter(|e| !e.is_empty())
        .map(|e| {
            let e = e.to_lowercase();
            if e.starts_with('.') {
                e
            } else {
                format!(".{}", e)
            }
        })
        .collect();
    if exts.is_empty() {
        DEFAULT_PATH_EXT.iter().map(|e| e.to_string()).collect()
    } else {
        exts
    }
}

/// Whether the final component of `file` has an extension
fn has_ext(file: &str) -> bool {
    match file.rfind('.') {
        Some(dot) => file.rfind(['\\', '/', ':']).map_or(true, |sep| sep < dot),
        None => false,
    }
}

fn is_executable_file(path: &str) -> bool {
    Path::new(path).is_file()
}

/// Try `file` and then `file` + each extension
fn find_executable(file: &str, exts: &[String]) -> Option<String> {
    if exts.is_empty() || has_ext(file) {
        if is_executable_file(file) {
            return Some(file.to_string());
        }
        if exts.is_empty() {
            return None;
        }
    }
    exts.iter()
        .map(|ext| format!("{}{}", file, ext))
        .find(|candidate| is_executable_file(candidate))
}

/// Windows executable search with explicit extensions and search directories.
///
/// A name containing a separator is only tried in place; a bare name is
/// tried in each of `dirs` in order.
pub fn look_path_in(file: &str, exts: &[String], dirs: &[PathBuf]) -> Result<String> {
    if has_separator(file) {
        return find_executable(file, exts).ok_or_else(|| Error::NotFound(file.to_string()));
    }
    for dir in dirs {
        let candidate = dir.join(file).to_string_lossy().into_owned();
        if let Some(found) = find_executable(&candidate, exts) {
            return Ok(found);
        }
    }
    Err(Error::NotFound(file.to_string()))
}

/// Search `PATH` for `file` using the `PATHEXT` extensions
pub fn look_path(file: &str) -> Result<String> {
    let dirs: Vec<PathBuf> = env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default();
    look_path_in(file, &path_ext(), &dirs)
}

/// Complete the extension of `path` as it will be seen from `dir`.
pub fn look_extensions(path: &str, dir: &str) -> Result<String> {
    look_extensions_with(path, dir, look_path)
}

/// `look_extensions` with an explicit executable search.
///
/// The returned path stays relative to `dir` when it was relative, because
/// the working directory only applies once the child is running; only the
/// extension the search inferred is appended.
pub fn look_extensions_with<F>(path: &str, dir: &str, search: F) -> Result<String>
where
    F: Fn(&str) -> Result<String>,
{
    if !has_separator(path) {
        return search(path);
    }
    if dir.is_empty() || volume_name_len(path) != 0 || is_slash(path.as_bytes()[0]) {
        return search(path);
    }
    let dir_and_path = join(dir, path);
    let found = search(&dir_and_path)?;
    let ext = found.strip_prefix(dir_and_path.as_str()).unwrap_or("");
    Ok(format!("{}{}", path, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;

    #[test]
    fn test_join_plain_name_under_dir() {
        assert_eq!(
            join_exe_dir_and_fname("C:\\work", "bar.exe").unwrap(),
            "C:\\work\\bar.exe"
        );
    }

    #[test]
    fn test_join_other_drive_absolute_unchanged() {
        assert_eq!(
            join_exe_dir_and_fname("C:\\work", "D:\\bar.exe").unwrap(),
            "D:\\bar.exe"
        );
    }

    #[test]
    fn test_join_unc_unchanged() {
        assert_eq!(
            join_exe_dir_and_fname("C:\\work", "\\\\server\\share\\tool.exe").unwrap(),
            "\\\\server\\share\\tool.exe"
        );
    }

    #[test]
    fn test_join_drive_relative_same_drive() {
        assert_eq!(
            join_exe_dir_and_fname("C:\\work", "c:bin\\tool.exe").unwrap(),
            "C:\\work\\bin\\tool.exe"
        );
    }

    #[test]
    fn test_join_drive_relative_other_drive() {
        assert_eq!(
            join_exe_dir_and_fname("C:\\work", "D:tool.exe").unwrap(),
            "D:\\tool.exe"
        );
    }

    #[test]
    fn test_join_leading_separator_is_root_of_dir_drive() {
        assert_eq!(
            join_exe_dir_and_fname("E:\\projects\\x", "\\tools\\run.exe").unwrap(),
            "E:\\tools\\run.exe"
        );
    }

    #[test]
    fn test_join_cleans_dot_segments() {
        assert_eq!(
            join_exe_dir_and_fname("C:\\work\\sub", "..\\bin\\.\\a.exe").unwrap(),
            "C:\\work\\bin\\a.exe"
        );
    }

    #[test]
    fn test_join_rejects_bare_drive() {
        assert!(matches!(
            join_exe_dir_and_fname("C:\\work", "C:"),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_join_rejects_empty_and_unc_dir() {
        assert!(join_exe_dir_and_fname("C:\\work", "").is_err());
        assert!(join_exe_dir_and_fname("\\\\server\\share", "a.exe").is_err());
    }

    #[test]
    fn test_volume_name_len() {
        assert_eq!(volume_name_len("C:\\x"), 2);
        assert_eq!(volume_name_len("c:"), 2);
        assert_eq!(volume_name_len("\\\\srv\\share\\dir"), 11);
        assert_eq!(volume_name_len("\\x"), 0);
        assert_eq!(volume_name_len("rel\\x"), 0);
    }

    #[test]
    fn test_is_abs() {
        assert!(is_abs("C:\\x"));
        assert!(is_abs("C:/x"));
        assert!(is_abs("\\\\srv\\share"));
        assert!(!is_abs("C:x"));
        assert!(!is_abs("\\x"));
        assert!(!is_abs("x"));
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("C:/a//b/./c/../d"), "C:\\a\\b\\d");
        assert_eq!(clean("C:\\..\\a"), "C:\\a");
        assert_eq!(clean("a\\..\\..\\b"), "..\\b");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("C:\\"), "C:\\");
    }

    #[test]
    fn test_look_extensions_bare_name_skips_join() {
        let seen = RefCell::new(Vec::new());
        let result = look_extensions_with("foo", "", |p| {
            seen.borrow_mut().push(p.to_string());
            Ok(format!("C:\\bin\\{}.exe", p))
        })
        .unwrap();
        assert_eq!(result, "C:\\bin\\foo.exe");
        assert_eq!(*seen.borrow(), vec!["foo".to_string()]);
    }

    #[test]
    fn test_look_extensions_bare_name_ignores_dir() {
        let seen = RefCell::new(Vec::new());
        look_extensions_with("foo", "C:\\work", |p| {
            seen.borrow_mut().push(p.to_string());
            Ok(p.to_string())
        })
        .unwrap();
        assert_eq!(*seen.borrow(), vec!["foo".to_string()]);
    }

    #[test]
    fn test_look_extensions_relative_keeps_path_appends_ext() {
        let seen = RefCell::new(Vec::new());
        let result = look_extensions_with("bin\\tool", "C:\\work", |p| {
            seen.borrow_mut().push(p.to_string());
            Ok(format!("{}.exe", p))
        })
        .unwrap();
        assert_eq!(result, "bin\\tool.exe");
        assert_eq!(*seen.borrow(), vec!["C:\\work\\bin\\tool".to_string()]);
    }

    #[test]
    fn test_look_extensions_absolute_is_searched_directly() {
        let result = look_extensions_with("D:\\x\\tool", "C:\\work", |p| {
            assert_eq!(p, "D:\\x\\tool");
            Ok(format!("{}.cmd", p))
        })
        .unwrap();
        assert_eq!(result, "D:\\x\\tool.cmd");
    }

    #[test]
    fn test_look_extensions_propagates_not_found() {
        let result = look_extensions_with(".\\missing", "C:\\work", |p| {
            Err(Error::NotFound(p.to_string()))
        });
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_parse_path_ext() {
        assert_eq!(parse_path_ext(".COM;.EXE;;BAT"), vec![".com", ".exe", ".bat"]);
        assert_eq!(parse_path_ext(""), DEFAULT_PATH_EXT.to_vec());
    }

    #[test]
    fn test_has_ext() {
        assert!(has_ext("tool.exe"));
        assert!(has_ext("C:\\dir\\tool.exe"));
        assert!(!has_ext("C:\\dir.d\\tool"));
        assert!(!has_ext("tool"));
    }

    #[test]
    fn test_look_path_in_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("tool.exe")).unwrap();
        let exts = parse_path_ext(".com;.exe");

        let found = look_path_in("tool", &exts, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, dir.path().join("tool.exe").to_string_lossy());
    }

    #[test]
    fn test_look_path_in_searches_dirs_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        File::create(first.path().join("tool.bat")).unwrap();
        File::create(second.path().join("tool.exe")).unwrap();
        let exts = parse_path_ext(".exe;.bat");
        let dirs = [first.path().to_path_buf(), second.path().to_path_buf()];

        let found = look_path_in("tool", &exts, &dirs).unwrap();
        assert_eq!(found, first.path().join("tool.bat").to_string_lossy());
    }

    #[test]
    fn test_look_path_in_explicit_path_not_searched() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("run.cmd")).unwrap();
        let exts = parse_path_ext(".cmd");
        let explicit = dir.path().join("run").to_string_lossy().into_owned();

        let found = look_path_in(&explicit, &exts, &[]).unwrap();
        assert_eq!(found, format!("{}.cmd", explicit));
        assert!(matches!(
            look_path_in("run", &exts, &[]),
            Err(Error::NotFound(_))
        ));
    }
}
