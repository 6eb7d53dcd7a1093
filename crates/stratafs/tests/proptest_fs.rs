//! Property-based tests for path handling and layer invariants
//!
//! Run with: `cargo test --test proptest_fs`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use proptest::prelude::*;
use stratafs::fs::util;
use stratafs::path::{clean, is_local, join, normalize};
use stratafs::{BasePathFs, Fs, MemFs};

// Path-like strings over a small alphabet so `..` and `.` show up often.
fn path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            Just("..".to_string()),
            Just(".".to_string()),
            Just(String::new()),
            "[a-c]{1,2}",
        ],
        0..8,
    )
    .prop_flat_map(|parts| {
        let joined = parts.join("/");
        prop_oneof![Just(joined.clone()), Just(format!("/{joined}"))]
    })
}

fn dir_chain_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-d]{1,3}", 1..6).prop_map(|parts| format!("/{}", parts.join("/")))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Cleaning is idempotent.
    #[test]
    fn clean_is_idempotent(p in path_strategy()) {
        let once = clean(Path::new(&p));
        prop_assert_eq!(clean(&once), once);
    }

    /// Normalized paths are absolute and free of dot segments.
    #[test]
    fn normalize_is_canonical(p in path_strategy()) {
        let n = normalize(Path::new(&p));
        prop_assert!(n.has_root());
        let s = n.to_string_lossy().into_owned();
        prop_assert!(!s.split('/').any(|seg| seg == "." || seg == ".."));
        prop_assert!(s == "/" || !s.ends_with('/'));
        prop_assert_eq!(normalize(&n), n.clone());
    }

    /// A local path joined under any base stays under it.
    #[test]
    fn local_paths_stay_under_base(p in path_strategy(), base in dir_chain_strategy()) {
        if is_local(Path::new(&p)) {
            let joined = join(Path::new(&base), Path::new(&p));
            prop_assert!(joined.starts_with(&base), "{} escaped {}", joined.display(), base);
        }
    }

    /// Every operation on an escaping path reports NotFound, whether or not
    /// the target exists on the wrapped store.
    #[test]
    fn confinement_never_escapes(p in path_strategy()) {
        let base = PathBuf::from("/jail/inner");
        let host = Arc::new(MemFs::new());
        host.mkdir_all(&base, 0o755).unwrap();
        util::write_file(host.as_ref(), Path::new("/jail/secret"), b"s", 0o600).unwrap();
        util::write_file(host.as_ref(), Path::new("/a"), b"a", 0o600).unwrap();
        let jail = BasePathFs::new(host.clone(), &base);

        let real = join(&base, Path::new(&p));
        if !real.starts_with(&base) {
            let name = Path::new(&p);
            prop_assert!(jail.stat(name).unwrap_err().is_not_found());
            prop_assert!(jail.open(name).unwrap_err().is_not_found());
            prop_assert!(jail.create(name).unwrap_err().is_not_found());
            prop_assert!(jail.mkdir_all(name, 0o755).unwrap_err().is_not_found());
            prop_assert!(jail.remove_all(name).unwrap_err().is_not_found());
            prop_assert!(jail.chmod(name, 0o777).unwrap_err().is_not_found());
            prop_assert!(jail.rename(name, Path::new("/x")).unwrap_err().is_not_found());
            prop_assert!(jail.rename(Path::new("/x"), name).unwrap_err().is_not_found());

            // Nothing on the host changed.
            prop_assert_eq!(host.stat(Path::new("/jail/secret")).unwrap().mode, 0o600);
            prop_assert_eq!(host.stat(Path::new("/a")).unwrap().mode, 0o600);
        }
    }

    /// mkdir_all twice leaves the same tree and keeps the first modes.
    #[test]
    fn mkdir_all_is_idempotent(dir in dir_chain_strategy()) {
        let fs = MemFs::new();
        fs.mkdir_all(Path::new(&dir), 0o750).unwrap();
        let before = fs.usage();
        fs.mkdir_all(Path::new(&dir), 0o700).unwrap();

        prop_assert_eq!(fs.usage(), before);
        prop_assert_eq!(fs.stat(Path::new(&dir)).unwrap().mode, 0o750);
    }
}
