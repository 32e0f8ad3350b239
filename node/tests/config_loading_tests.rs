//! Exercises `common::config::load` against a file on disk, the way
//! `node`'s binary reads it at startup.

use std::io::Write;

#[test]
fn loads_directory_and_this_nodes_neighbors_from_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "5").unwrap();
    writeln!(f, "1 127.0.0.1 9001").unwrap();
    writeln!(f, "2 127.0.0.1 9002").unwrap();
    writeln!(f, "3 127.0.0.1 9003").unwrap();
    writeln!(f, "-1").unwrap();
    writeln!(f, "1 2 3").unwrap();
    writeln!(f, "2 1").unwrap();
    writeln!(f, "3 1").unwrap();
    drop(f);

    let config = common::config::load(&path, 1).unwrap();
    assert_eq!(config.default_ttr, 5);
    assert_eq!(config.directory.len(), 3);
    assert_eq!(config.neighbors, vec![2, 3]);
}

#[test]
fn missing_file_surfaces_as_an_error_with_the_path_in_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope");
    let err = common::config::load(&path, 1).unwrap_err();
    assert!(format!("{err:#}").contains("nope"));
}
