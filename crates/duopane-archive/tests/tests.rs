use std::fs;
use std::path::{Path, PathBuf};

use duopane_archive::{
    ArchiveConfig, ArchiveController, ArchiveFormat, ErrorCode, ExtractMethod, TaskState,
};
use tokio::runtime::Handle;

fn controller() -> ArchiveController {
    ArchiveController::new(Handle::current(), ArchiveConfig::default())
}

fn workspace() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("duopane-test-")
        .tempdir()
        .expect("Failed to create temp dir")
}

async fn run_to_end(archives: &ArchiveController, id: &str) -> duopane_archive::ArchiveTaskStatus {
    archives.wait_for_task(id).await;
    archives.get_task_status(id).expect("task is registered")
}

fn sample_tree(root: &Path) -> Vec<PathBuf> {
    fs::create_dir_all(root.join("docs/sub")).unwrap();
    fs::write(root.join("docs/a.txt"), b"alpha").unwrap();
    fs::write(root.join("docs/sub/b.bin"), [0u8, 1, 2, 3, 255]).unwrap();
    fs::write(root.join("top.txt"), b"top level").unwrap();
    vec![root.join("docs"), root.join("top.txt")]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn notes_round_trip_through_tar() {
    if !ArchiveFormat::Tar.is_available() {
        return;
    }
    let dir = workspace();
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, "hello").unwrap();
    let archive = dir.path().join("archive.tar");
    let archives = controller();

    let id = archives
        .create_archive(&[notes], &archive, ArchiveFormat::Tar, 6)
        .unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Completed, "{:?}", status.error);
    let last = status.progress.expect("progress was reported");
    assert_eq!(last.processed_files, last.total_files);

    let metadata = archives.get_archive_metadata(&archive).await.unwrap();
    assert_eq!(metadata.file_count, 1);
    assert_eq!(metadata.entries[0].path, "notes.txt");
    assert_eq!(metadata.extracted_size, 5);

    let strategy = archives.analyze_structure(&archive).await.unwrap();
    assert_eq!(strategy.method, ExtractMethod::ExtractDirect);

    let out = dir.path().join("out");
    let id = archives.extract_archive(&archive, &out).unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Completed, "{:?}", status.error);
    assert_eq!(fs::read_to_string(out.join("notes.txt")).unwrap(), "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_available_backend_round_trips() {
    let archives = controller();
    for format in ArchiveFormat::ALL {
        if !format.is_available() {
            continue;
        }
        let dir = workspace();
        let sources = sample_tree(&dir.path().join("src"));
        let archive = dir.path().join(format!("bundle{}", format.extension()));

        let id = archives
            .create_archive(&sources, &archive, format, 5)
            .unwrap();
        let status = run_to_end(&archives, &id).await;
        assert_eq!(status.state, TaskState::Completed, "{format}: {:?}", status.error);
        assert!(archive.is_file(), "{format}: archive missing");

        let out = dir.path().join("out");
        let id = archives.extract_archive(&archive, &out).unwrap();
        let status = run_to_end(&archives, &id).await;
        assert_eq!(status.state, TaskState::Completed, "{format}: {:?}", status.error);

        // Two roots, so the archive unpacks into a directory named after it.
        let root = out.join("bundle");
        assert_eq!(fs::read(root.join("docs/a.txt")).unwrap(), b"alpha", "{format}");
        assert_eq!(
            fs::read(root.join("docs/sub/b.bin")).unwrap(),
            [0u8, 1, 2, 3, 255],
            "{format}"
        );
        assert_eq!(fs::read(root.join("top.txt")).unwrap(), b"top level", "{format}");

        // No staging leftovers next to the archive.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".duopane-"))
            .collect();
        assert!(leftovers.is_empty(), "{format}: staging directory left behind");
    }
}

#[tokio::test]
async fn cancelled_before_running_is_cancelled() {
    if !ArchiveFormat::Tar.is_available() {
        return;
    }
    let dir = workspace();
    let sources = sample_tree(&dir.path().join("src"));
    let archive = dir.path().join("cancelled.tar");
    let archives = controller();

    let id = archives
        .create_archive(&sources, &archive, ArchiveFormat::Tar, 6)
        .unwrap();
    archives.cancel_task(&id).unwrap();
    let status = run_to_end(&archives, &id).await;

    assert_eq!(status.state, TaskState::Cancelled);
    assert!(status.cancelled && !status.running && !status.completed);
    assert_eq!(
        status.error.map(|err| err.code()),
        Some(ErrorCode::OperationCancelled)
    );
    assert!(!archive.exists());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escaping_symlink_rejects_the_archive() {
    if !ArchiveFormat::Tar.is_available() {
        return;
    }
    let dir = workspace();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("pkg")).unwrap();
    fs::write(src.join("pkg/readme"), b"hi").unwrap();
    std::os::unix::fs::symlink("../../../etc/passwd", src.join("pkg/passwd")).unwrap();

    let archive = dir.path().join("evil.tar");
    let status = std::process::Command::new("tar")
        .arg("-cf")
        .arg(&archive)
        .arg("-C")
        .arg(&src)
        .arg("pkg")
        .status()
        .unwrap();
    assert!(status.success());

    let archives = controller();
    let out = dir.path().join("out");
    let id = archives.extract_archive(&archive, &out).unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(
        status.error.map(|err| err.code()),
        Some(ErrorCode::PathTraversal)
    );
    assert!(!out.join("pkg/passwd").exists());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn colon_names_round_trip() {
    if !ArchiveFormat::Tar.is_available() {
        return;
    }
    let dir = workspace();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    let source = src.join("a:1.txt");
    fs::write(&source, b"colon").unwrap();
    let archive = dir.path().join("colon.tar");
    let archives = controller();

    let id = archives
        .create_archive(&[source], &archive, ArchiveFormat::Tar, 6)
        .unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Completed, "{:?}", status.error);

    let out = dir.path().join("out");
    let id = archives.extract_archive(&archive, &out).unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Completed, "{:?}", status.error);
    assert_eq!(fs::read(out.join("a:1.txt")).unwrap(), b"colon");
}

/// `unzip -l` shows no link targets, so only the sweep after extraction can
/// catch this link.
#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zip_symlink_out_of_tree_is_removed_after_extraction() {
    if !ArchiveFormat::Zip.is_available() {
        return;
    }
    let dir = workspace();
    let src = dir.path().join("src");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("plain.txt"), b"plain").unwrap();
    std::os::unix::fs::symlink("/etc", src.join("escape")).unwrap();

    let archive = dir.path().join("links.zip");
    let status = std::process::Command::new("zip")
        .arg("-q")
        .arg("-y")
        .arg(&archive)
        .arg("escape")
        .arg("plain.txt")
        .current_dir(&src)
        .status()
        .unwrap();
    assert!(status.success());

    let archives = controller();
    let out = dir.path().join("out");
    let id = archives.extract_archive(&archive, &out).unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(
        status.error.map(|err| err.code()),
        Some(ErrorCode::PathTraversal)
    );

    // Two roots, so everything lands under out/links.
    let root = out.join("links");
    assert!(root.join("escape").symlink_metadata().is_err());
    assert_eq!(fs::read(root.join("plain.txt")).unwrap(), b"plain");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_expansion_is_a_bomb() {
    if !ArchiveFormat::TarGz.is_available() {
        return;
    }
    let dir = workspace();
    let zeros = dir.path().join("zeros.bin");
    fs::write(&zeros, vec![0u8; 512 * 1024]).unwrap();
    let archive = dir.path().join("zeros.tar.gz");

    let config = ArchiveConfig {
        max_compression_ratio: 5.0,
        ..ArchiveConfig::default()
    };
    let archives = ArchiveController::new(Handle::current(), config);
    let id = archives
        .create_archive(&[zeros], &archive, ArchiveFormat::TarGz, 9)
        .unwrap();
    assert_eq!(run_to_end(&archives, &id).await.state, TaskState::Completed);

    let out = dir.path().join("out");
    let id = archives.extract_archive(&archive, &out).unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(
        status.error.map(|err| err.code()),
        Some(ErrorCode::CompressionBomb)
    );
    assert!(!out.join("zeros.bin").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn garbage_archive_is_corrupted() {
    if !ArchiveFormat::TarGz.is_available() {
        return;
    }
    let dir = workspace();
    let archive = dir.path().join("broken.tar.gz");
    fs::write(&archive, b"this is not gzip data at all").unwrap();

    let archives = controller();
    let id = archives
        .extract_archive(&archive, &dir.path().join("out"))
        .unwrap();
    let status = run_to_end(&archives, &id).await;
    assert_eq!(status.state, TaskState::Failed);
    assert_eq!(
        status.error.map(|err| err.code()),
        Some(ErrorCode::Corrupted)
    );
}

#[tokio::test]
async fn unknown_task_ids() {
    let archives = controller();
    assert!(archives.get_task_status("compress-99").is_none());
    assert!(archives.cancel_task("compress-99").is_err());
    archives.cleanup_task("compress-99");
    archives.wait_for_task("compress-99").await;
}
