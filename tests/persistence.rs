use std::sync::Arc;
use std::thread;

use lfs::config::{parse_config, LfsConfig};
use lfs::fsck::run_fsck;
use lfs::ops::{Command, Dispatcher, Reply};
use lfs::{BlockDevice, FileDevice, Lfs, LfsError, LFS_BLOCK_SIZE, MAX_FILE_SIZE, NUM_DIRECT_BLOCKS};
use tempfile::TempDir;

fn config_in(dir: &TempDir, format_if_missing: bool) -> LfsConfig {
    let image = dir.path().join("lfs.img");
    parse_config(&format!(
        "[device]\nimage = {}\ntotal_blocks = 2048\n\n[log]\nsegment_blocks = 32\n\n\
         [mount]\nformat_if_missing = {}\n",
        image.display(),
        format_if_missing
    ))
    .expect("config")
}

#[test]
fn open_formats_once_then_mounts() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config_in(&dir, true);

    let lfs = Lfs::open(&cfg).expect("format");
    let mut file = lfs.create_inode(false).expect("create");
    file.write(&lfs, 0, b"hello world", false).expect("write");
    file.write(&lfs, 11, b" extra", false).expect("write");
    let id = file.id();
    lfs.unmount().expect("unmount");

    let lfs = Lfs::open(&cfg).expect("mount");
    let file = lfs.load_inode(id).expect("load");
    assert_eq!(file.read(&lfs, 0, 17).expect("read"), b"hello world extra");
    assert_eq!(file.filesize(), 17);
    assert_eq!(lfs.superblock().segment_blocks, 32);
}

#[test]
fn open_refuses_blank_image_without_permission() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config_in(&dir, false);
    assert!(matches!(
        Lfs::open(&cfg),
        Err(LfsError::Format { what: "superblock", .. })
    ));
}

#[test]
fn indirect_file_survives_remount_and_checks_clean() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("big.img");

    let id = {
        let device: Arc<dyn BlockDevice> =
            Arc::new(FileDevice::create(&path, 1024).expect("image"));
        let lfs = Lfs::format(device, 64).expect("format");
        let mut file = lfs.create_inode(false).expect("create");
        let data: Vec<u8> = (0..(NUM_DIRECT_BLOCKS + 20) * LFS_BLOCK_SIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        file.write(&lfs, 0, &data, false).expect("write");
        assert!(file.indirect_block() != 0);
        lfs.unmount().expect("unmount");
        file.id()
    };

    let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::open(&path).expect("image"));
    let lfs = Lfs::mount(device).expect("mount");
    let file = lfs.load_inode(id).expect("load");
    let offset = (NUM_DIRECT_BLOCKS * LFS_BLOCK_SIZE - 3) as u64;
    let expected: Vec<u8> = (offset..offset + 6).map(|i| (i % 253) as u8).collect();
    assert_eq!(file.read(&lfs, offset, 6).expect("read"), expected);

    let report = run_fsck(&lfs);
    assert!(report.is_clean(), "{:?}", report.errors);

    let mut file = file;
    let err = file.write(&lfs, MAX_FILE_SIZE, b"x", false).unwrap_err();
    assert!(matches!(err, LfsError::CapacityExceeded { .. }));
    assert_eq!(err.as_errno(), libc::EFBIG);
}

#[test]
fn concurrent_clients_survive_remount() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config_in(&dir, true);
    let d = Arc::new(Dispatcher::new(Arc::new(Lfs::open(&cfg).expect("open"))));

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let d = Arc::clone(&d);
            thread::spawn(move || {
                let mut ids = Vec::new();
                for msg in 0..5 {
                    let Reply::Created { ino } =
                        d.execute(Command::Create { is_directory: false }).expect("create")
                    else {
                        panic!("expected Created");
                    };
                    let body = format!("writer {} message {}", writer, msg).into_bytes();
                    d.execute(Command::Write { ino, offset: 0, data: body }).expect("write");
                    d.execute(Command::Sync).expect("sync");
                    ids.push((ino, writer, msg));
                }
                ids
            })
        })
        .collect();

    let written: Vec<(u32, i32, i32)> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    assert_eq!(written.len(), 20);
    drop(d);

    let lfs = Lfs::open(&cfg).expect("remount");
    for (ino, writer, msg) in written {
        let file = lfs.load_inode(ino).expect("load");
        let body = file.read(&lfs, 0, 64).expect("read");
        assert_eq!(body, format!("writer {} message {}", writer, msg).into_bytes());
    }
    assert!(run_fsck(&lfs).is_clean());
}
