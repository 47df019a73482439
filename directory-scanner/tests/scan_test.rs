//! Integration tests for one-shot directory scans.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use codex_directory_scanner::{
    CollectVisitor, FileAttributes, ScanVisitor, ScannerConfig, ScannerFactory,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const FIXTURE_ROOT: &str = "com/softmotions/commons/io/scanner/data";

fn touch(base: &Path, relative: &str) {
    let path = base.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, relative).unwrap();
}

fn tree(files: &[&str]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    for file in files {
        touch(temp_dir.path(), file);
    }
    temp_dir
}

fn scan(factory: &ScannerFactory) -> Vec<PathBuf> {
    let mut scanner = factory.create_scanner().unwrap();
    let mut visitor = CollectVisitor::new();
    scanner.scan(&mut visitor).unwrap();
    assert!(visitor.errors.is_empty(), "{:?}", visitor.errors);
    let mut paths = visitor.paths();
    paths.sort();
    paths
}

fn paths(expected: &[&str]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = expected.iter().map(PathBuf::from).collect();
    paths.sort();
    paths
}

fn fixture() -> TempDir {
    let files: Vec<String> = [
        "b/b.txt",
        "b/c.txt",
        "b/d.txt",
        "b/c/efg.txt",
        "a/b.cpp",
        "a/a.h",
        "a/x/b.cpp",
    ]
    .iter()
    .map(|file| format!("{FIXTURE_ROOT}/{file}"))
    .collect();
    let files: Vec<&str> = files.iter().map(String::as_str).collect();
    tree(&files)
}

fn in_fixture(files: &[&str]) -> Vec<PathBuf> {
    let files: Vec<String> = files
        .iter()
        .map(|file| format!("{FIXTURE_ROOT}/{file}"))
        .collect();
    let files: Vec<&str> = files.iter().map(String::as_str).collect();
    paths(&files)
}

#[test]
fn test_include_by_extension() {
    let temp_dir = tree(&["a/b/c.txt", "a/b/d.rs", ".git/HEAD.txt", "a/b/e.txt~"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory.include("**/*.txt").unwrap();

    assert_eq!(scan(&factory), paths(&["a/b/c.txt"]));
}

#[test]
fn test_include_tree_minus_exclude() {
    let temp_dir = tree(&["a/c.txt", "a/b/c.txt", "a/b/d.txt", "a/e.rs", "z/f.txt"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory.include("a/**").unwrap().exclude("**/c.txt").unwrap();

    assert_eq!(scan(&factory), paths(&["a/b/d.txt", "a/e.rs"]));
}

#[test]
fn test_no_includes_matches_everything() {
    let temp_dir = tree(&["one.txt", "deep/er/two.rs"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();

    assert_eq!(scan(&factory), paths(&["deep/er/two.rs", "one.txt"]));
}

#[test]
fn test_default_excludes_hide_vcs_metadata() {
    let temp_dir = tree(&[
        ".git/config",
        ".git/objects/ab/cdef",
        "sub/.git",
        "sub/main.rs",
        ".svn/entries",
        ".DS_Store",
        "notes.txt~",
        "#scratch#",
    ]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();

    assert_eq!(scan(&factory), paths(&["sub/main.rs"]));
}

#[test]
fn test_vcs_metadata_visible_without_default_excludes() {
    let temp_dir = tree(&[".git/config", ".git/objects/ab/cdef", "sub/.git", "sub/main.rs"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory
        .include("**/.git")
        .unwrap()
        .include("**/.git/**")
        .unwrap()
        .set_use_default_excludes(false);

    assert_eq!(
        scan(&factory),
        paths(&[".git/config", ".git/objects/ab/cdef", "sub/.git"])
    );

    // The defaults win over includes when left on.
    factory.set_use_default_excludes(true);
    assert_eq!(scan(&factory), Vec::<PathBuf>::new());
}

#[test]
fn test_fixture_single_include() {
    let temp_dir = fixture();
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory.include("com/softmotions/**/dat?/*/{b,c}.txt").unwrap();

    assert_eq!(scan(&factory), in_fixture(&["b/b.txt", "b/c.txt"]));
}

#[test]
fn test_fixture_exclude_narrows() {
    let temp_dir = fixture();
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory
        .include("com/softmotions/**/dat?/*/{b,c}.txt")
        .unwrap()
        .exclude("**/*/b.txt")
        .unwrap();

    assert_eq!(scan(&factory), in_fixture(&["b/c.txt"]));
}

#[test]
fn test_fixture_exclude_everything() {
    let temp_dir = fixture();
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory
        .include("com/softmotions/**/dat?/*/{b,c}.txt")
        .unwrap()
        .exclude("**/*")
        .unwrap();

    assert_eq!(scan(&factory), Vec::<PathBuf>::new());
}

#[test]
fn test_fixture_multiple_includes() {
    let temp_dir = fixture();
    let config = ScannerConfig::new()
        .include("com/softmotions/**/dat?/*/{b,c}.txt")
        .include("**/ef*.txt")
        .include("com/**/a/*.cp?");
    let factory = ScannerFactory::from_config(temp_dir.path(), &config).unwrap();

    assert_eq!(
        scan(&factory),
        in_fixture(&["a/b.cpp", "b/b.txt", "b/c.txt", "b/c/efg.txt"])
    );
}

#[test]
fn test_config_from_json() {
    let temp_dir = fixture();
    let config = ScannerConfig::from_json(
        r#"{ "includes": ["**/*.cpp"], "excludes": ["**/x/**"] }"#,
    )
    .unwrap();
    let factory = ScannerFactory::from_config(temp_dir.path(), &config).unwrap();

    assert_eq!(scan(&factory), in_fixture(&["a/b.cpp"]));
}

#[test]
fn test_attributes_describe_the_file() {
    let temp_dir = tree(&["data/file.bin"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    let mut scanner = factory.create_scanner().unwrap();
    let mut visitor = CollectVisitor::new();
    scanner.scan(&mut visitor).unwrap();

    assert_eq!(visitor.matches.len(), 1);
    let (path, attributes) = &visitor.matches[0];
    assert_eq!(path, &PathBuf::from("data/file.bin"));
    assert!(attributes.is_file);
    assert!(!attributes.is_directory);
    assert_eq!(attributes.size, "data/file.bin".len() as u64);
    assert!(attributes.modified.is_some());
}

/// Visitor that fails every callback but still counts them.
#[derive(Default)]
struct FailingVisitor {
    visits: usize,
}

impl ScanVisitor for FailingVisitor {
    fn visit(&mut self, _path: &Path, _attributes: &FileAttributes) -> anyhow::Result<()> {
        self.visits += 1;
        anyhow::bail!("visitor refused")
    }

    fn error(&mut self, _path: &Path, _error: &io::Error) -> anyhow::Result<()> {
        anyhow::bail!("visitor refused")
    }
}

#[test]
fn test_visitor_failure_does_not_abort_walk() {
    let temp_dir = tree(&["a.txt", "b/c.txt", "b/d/e.txt"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    let mut scanner = factory.create_scanner().unwrap();

    let mut visitor = FailingVisitor::default();
    scanner.scan(&mut visitor).unwrap();
    assert_eq!(visitor.visits, 3);
}

#[test]
fn test_scanner_is_reusable() {
    let temp_dir = tree(&["a.txt"]);
    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    let mut scanner = factory.create_scanner().unwrap();

    let mut first = CollectVisitor::new();
    scanner.scan(&mut first).unwrap();
    touch(temp_dir.path(), "b.txt");
    let mut second = CollectVisitor::new();
    scanner.scan(&mut second).unwrap();

    assert_eq!(first.paths(), paths(&["a.txt"]));
    let mut found = second.paths();
    found.sort();
    assert_eq!(found, paths(&["a.txt", "b.txt"]));
}

#[cfg(unix)]
#[test]
fn test_pruned_directories_are_never_entered() {
    use std::os::unix::fs::symlink;

    let temp_dir = tree(&["keep/a.txt", "skip/b.txt"]);
    // Following this link fails, so entering `skip` would report an error.
    symlink(temp_dir.path().join("missing"), temp_dir.path().join("skip/dangling")).unwrap();

    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory.include("keep/**").unwrap().set_follow_links(true);

    assert_eq!(scan(&factory), paths(&["keep/a.txt"]));
}

#[cfg(unix)]
#[test]
fn test_unreadable_entry_reported_and_walk_continues() {
    use std::os::unix::fs::symlink;

    let temp_dir = tree(&["a.txt", "z/b.txt"]);
    symlink(temp_dir.path().join("missing"), temp_dir.path().join("dangling")).unwrap();

    let factory = ScannerFactory::new(temp_dir.path()).unwrap();
    factory.set_follow_links(true);
    let mut scanner = factory.create_scanner().unwrap();
    let mut visitor = CollectVisitor::new();
    scanner.scan(&mut visitor).unwrap();

    let mut found = visitor.paths();
    found.sort();
    assert_eq!(found, paths(&["a.txt", "z/b.txt"]));
    assert_eq!(visitor.errors.len(), 1);
    assert_eq!(visitor.errors[0].0, PathBuf::from("dangling"));
}

#[test]
fn test_scan_result_is_independent_of_base_spelling() {
    let temp_dir = tree(&["sub/x.txt"]);
    let factory = ScannerFactory::new(temp_dir.path().join("sub/../sub")).unwrap();

    assert_eq!(scan(&factory), paths(&["x.txt"]));
}
