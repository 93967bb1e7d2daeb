//! Real-directory/real-file bridging exercised against an actual
//! temporary directory tree (§4.5 "Real directory bridging", "File
//! open"). The tests in `src/vfs/node.rs` cover the in-memory node kinds;
//! these cover the two kinds that proxy to the host filesystem, which
//! needs real paths on disk to exercise honestly.

use std::collections::BTreeMap;
use std::fs;

use rpy_sandbox_host::errno::Errno;
use rpy_sandbox_host::vfs::node::{AccessMode, Identity, RealDirOptions};
use rpy_sandbox_host::vfs::{FdTable, Node};

fn identity() -> Identity {
    Identity { uid: 1000, gid: 1000 }
}

#[test]
fn real_dir_lists_sorted_children() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("zeta.txt"), b"z").unwrap();
    fs::write(tmp.path().join("alpha.txt"), b"a").unwrap();
    fs::create_dir(tmp.path().join("mid")).unwrap();

    let node = Node::real_dir(tmp.path(), RealDirOptions::default());
    assert_eq!(node.children().unwrap(), vec!["alpha.txt", "mid", "zeta.txt"]);
}

#[test]
fn real_dir_hides_dotfiles_unless_configured() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join(".hidden"), b"secret").unwrap();
    fs::write(tmp.path().join("visible"), b"ok").unwrap();

    let hidden = Node::real_dir(tmp.path(), RealDirOptions::default());
    assert_eq!(hidden.children().unwrap(), vec!["visible"]);

    let shown = Node::real_dir(
        tmp.path(),
        RealDirOptions { show_dotfiles: true, follow_links: false, exclude: vec![] },
    );
    assert_eq!(shown.children().unwrap(), vec![".hidden", "visible"]);
}

#[test]
fn real_dir_excludes_by_case_insensitive_suffix() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("build.PYC"), b"x").unwrap();
    fs::write(tmp.path().join("main.py"), b"x").unwrap();

    let node = Node::real_dir(
        tmp.path(),
        RealDirOptions { show_dotfiles: false, follow_links: false, exclude: vec![".pyc".to_string()] },
    );
    assert_eq!(node.children().unwrap(), vec!["main.py"]);
}

#[test]
fn real_dir_join_descends_into_subdirectories_and_files() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("bin")).unwrap();
    fs::write(tmp.path().join("bin").join("tool"), b"ELF payload").unwrap();

    let root = Node::real_dir(tmp.path(), RealDirOptions::default());
    let bin = root.join("bin").unwrap();
    assert!(bin.is_dir());
    let tool = bin.join("tool").unwrap();
    assert!(!tool.is_dir());
    assert_eq!(tool.read_all().unwrap(), b"ELF payload");
    assert_eq!(tool.size().unwrap(), "ELF payload".len() as u64);
}

#[test]
fn real_dir_join_missing_name_is_enoent() {
    let tmp = tempfile::tempdir().unwrap();
    let root = Node::real_dir(tmp.path(), RealDirOptions::default());
    assert_eq!(root.join("nope").unwrap_err(), Errno::NoEnt);
}

#[cfg(unix)]
#[test]
fn real_dir_refuses_to_expose_symlinks_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("real.txt"), b"data").unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link.txt")).unwrap();

    let root = Node::real_dir(tmp.path(), RealDirOptions::default());
    assert_eq!(root.join("link.txt").unwrap_err(), Errno::Access);
}

#[cfg(unix)]
#[test]
fn real_dir_follows_symlinks_when_configured() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("real.txt"), b"data").unwrap();
    std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link.txt")).unwrap();

    let root = Node::real_dir(
        tmp.path(),
        RealDirOptions { show_dotfiles: false, follow_links: true, exclude: vec![] },
    );
    let node = root.join("link.txt").unwrap();
    assert_eq!(node.read_all().unwrap(), b"data");
}

#[test]
fn real_file_open_read_close_round_trips_through_fd_table() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("payload.bin");
    fs::write(&path, b"hello from disk").unwrap();

    let node = Node::real_file(&path, 0o444);
    let mut fds = FdTable::new(3..49);
    let fd = fds.open(node).unwrap();

    let mut out = Vec::new();
    loop {
        let chunk = fds.read(fd, 4).unwrap();
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    assert_eq!(out, b"hello from disk");

    fds.close(fd).unwrap();
    assert_eq!(fds.read(fd, 1).unwrap_err(), Errno::BadF);
}

#[test]
fn real_file_stat_reports_read_only_access() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("readonly");
    fs::write(&path, b"content").unwrap();

    let node = Node::real_file(&path, 0o444);
    let st = node.stat(0).unwrap();
    assert_eq!(st.st_size, "content".len() as i64);

    assert!(node.access(AccessMode::READ, identity()).unwrap());
    assert!(!node.access(AccessMode::WRITE, identity()).unwrap());
}

#[test]
fn real_dir_children_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("a"), b"").unwrap();
    fs::write(tmp.path().join("b"), b"").unwrap();
    let node = Node::real_dir(tmp.path(), RealDirOptions::default());
    assert_eq!(node.children().unwrap(), node.children().unwrap());
}

#[test]
fn mixed_in_memory_and_real_tree_resolves_both_kinds() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("on_disk"), b"disk bytes").unwrap();

    let mut entries = BTreeMap::new();
    entries.insert("mem".to_string(), Node::file(b"mem bytes".to_vec(), 0));
    entries.insert("disk".to_string(), Node::real_dir(tmp.path(), RealDirOptions::default()));
    let root = Node::dir(entries);

    let mem = root.join("mem").unwrap().read_all().unwrap();
    let disk_dir = root.join("disk").unwrap();
    let disk_file = disk_dir.join("on_disk").unwrap().read_all().unwrap();

    assert_eq!(mem, b"mem bytes");
    assert_eq!(disk_file, b"disk bytes");
}
