//! Model-based property tests: arbitrary operation sequences against a
//! reference model of per-file version stacks.
//!
//! After every operation the engine must pass its own integrity check, and
//! block accounting must match the model exactly (each live version owns one
//! chain sized to its content).

use cfs_core::{BLOCK_SIZE, CfsError, CowFs, Fd, FileMode, VersionNumber};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Eight blocks of content at most, sixty-four blocks of image: small enough
/// to hit OutOfSpace, large enough for interesting histories.
const IMAGE_BLOCKS: u64 = 64;
const MAX_NAMES: usize = 8;

#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    Write(usize, Vec<u8>),
    ReadBack(usize),
    Rollback(usize, u32),
    Gc,
    Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..MAX_NAMES).prop_map(Op::Create),
        (0..MAX_NAMES, proptest::collection::vec(any::<u8>(), 0..2 * BLOCK_SIZE))
            .prop_map(|(f, content)| Op::Write(f, content)),
        (0..MAX_NAMES).prop_map(Op::ReadBack),
        (0..MAX_NAMES, 1..8_u32).prop_map(|(f, v)| Op::Rollback(f, v)),
        Just(Op::Gc),
        Just(Op::Reopen),
    ]
}

#[derive(Debug, Default)]
struct Model {
    /// Version stacks per created file, oldest first.
    files: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Model {
    fn expected_blocks(&self) -> u64 {
        self.files
            .values()
            .flatten()
            .map(|content| (content.len() as u64).div_ceil(BLOCK_SIZE as u64))
            .sum()
    }
}

struct Driver {
    fs: CowFs,
    write_fds: BTreeMap<String, Fd>,
}

impl Driver {
    fn open(path: &std::path::Path) -> Self {
        let fs = CowFs::open_image(path, IMAGE_BLOCKS * BLOCK_SIZE as u64).expect("open image");
        Self {
            fs,
            write_fds: BTreeMap::new(),
        }
    }

    fn write_fd(&mut self, name: &str) -> Fd {
        if let Some(fd) = self.write_fds.get(name) {
            return *fd;
        }
        let fd = self.fs.open(name, FileMode::Write).expect("open for write");
        self.write_fds.insert(name.to_owned(), fd);
        fd
    }

    fn read_back(&mut self, name: &str) -> Vec<u8> {
        let fd = self.fs.open(name, FileMode::Read).expect("open for read");
        let size = self.fs.get_file_size(fd).expect("size") as usize;
        let mut buf = vec![0_u8; size];
        let mut done = 0;
        while done < size {
            let n = self.fs.read(fd, &mut buf[done..]).expect("read");
            assert!(n > 0, "unexpected EOF");
            done += n;
        }
        self.fs.close_fd(fd).expect("close read fd");
        buf
    }
}

fn check_against_model(fs: &CowFs, model: &Model) {
    let findings = fs.check();
    assert!(findings.is_empty(), "integrity findings: {findings:?}");
    assert_eq!(
        fs.get_total_memory_usage(),
        model.expected_blocks() * BLOCK_SIZE as u64,
        "block accounting diverged from model"
    );

    let mut names = fs.list_files();
    names.sort_unstable();
    let expected: Vec<String> = model.files.keys().cloned().collect();
    assert_eq!(names, expected, "namespace diverged from model");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn operation_sequences_preserve_invariants(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("prop.img");
        let mut driver = Driver::open(&path);
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Create(idx) => {
                    let name = format!("file{idx}");
                    match driver.fs.create(&name) {
                        Ok(fd) => {
                            prop_assert!(!model.files.contains_key(&name));
                            model.files.insert(name.clone(), Vec::new());
                            driver.write_fds.insert(name, fd);
                        }
                        Err(CfsError::AlreadyExists(_)) => {
                            prop_assert!(model.files.contains_key(&name));
                        }
                        Err(other) => return Err(TestCaseError::fail(format!("create: {other}"))),
                    }
                }
                Op::Write(idx, content) => {
                    let name = format!("file{idx}");
                    if !model.files.contains_key(&name) {
                        continue;
                    }
                    let fd = driver.write_fd(&name);
                    match driver.fs.write(fd, &content) {
                        Ok(n) if content.is_empty() => {
                            prop_assert_eq!(n, 0);
                        }
                        Ok(n) => {
                            prop_assert_eq!(n, content.len());
                            let stack = model.files.get_mut(&name).expect("model file");
                            let current = stack.last().map(Vec::as_slice).unwrap_or(b"");
                            // A changed write appends; matching content or a
                            // pure truncation-to-prefix is a no-op.
                            let is_noop = !current.is_empty()
                                && content.len() <= current.len()
                                && current[..content.len()] == content[..];
                            if !is_noop {
                                stack.push(content);
                            }
                        }
                        Err(CfsError::OutOfSpace) => { /* model unchanged */ }
                        Err(other) => return Err(TestCaseError::fail(format!("write: {other}"))),
                    }
                }
                Op::ReadBack(idx) => {
                    let name = format!("file{idx}");
                    let Some(stack) = model.files.get(&name) else {
                        continue;
                    };
                    let expected = stack.last().map(Vec::as_slice).unwrap_or(b"");
                    let actual = driver.read_back(&name);
                    prop_assert_eq!(actual.as_slice(), expected);
                }
                Op::Rollback(idx, version) => {
                    let name = format!("file{idx}");
                    if !model.files.contains_key(&name) {
                        continue;
                    }
                    let fd = driver.write_fd(&name);
                    let stack_len = model.files[&name].len() as u32;
                    match driver.fs.rollback_to_version(fd, VersionNumber(version)) {
                        Ok(()) => {
                            prop_assert!(version >= 1 && version <= stack_len);
                            model
                                .files
                                .get_mut(&name)
                                .expect("model file")
                                .truncate(version as usize);
                        }
                        Err(CfsError::VersionOutOfRange { .. }) => {
                            prop_assert!(version == 0 || version > stack_len);
                        }
                        Err(other) => {
                            return Err(TestCaseError::fail(format!("rollback: {other}")))
                        }
                    }
                }
                Op::Gc => {
                    // With eager reclamation the sweep must find nothing.
                    prop_assert_eq!(driver.fs.garbage_collect(), 0);
                }
                Op::Reopen => {
                    driver.write_fds.clear();
                    driver.fs.save().expect("save image");
                    // The replaced instance re-saves identical state on drop.
                    driver.fs = CowFs::open_image(&path, IMAGE_BLOCKS * BLOCK_SIZE as u64)
                        .expect("reopen image");
                }
            }

            check_against_model(&driver.fs, &model);
        }
    }
}
