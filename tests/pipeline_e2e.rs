//! End-to-end pipeline tests against a stub encoder binary.

#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use pagecut::{
    CaptureRequest, CaptureSource, Config, DeliveryMode, FrameSink, Host, MemorySink,
    PagecutError, PagecutResult, RawOptions, TestPatternSource, run_pipeline,
};

fn host_in(dir: &Path) -> Host {
    Host {
        parallelism: 4,
        working_dir: dir.to_path_buf(),
        timestamp_ms: 1_700_000_000_000,
    }
}

fn write_stub_encoder(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn resolve(dir: &Path, raw: RawOptions) -> Config {
    Config::resolve(raw, &host_in(dir)).unwrap()
}

fn frame_dir_of(cfg: &Config) -> PathBuf {
    match &cfg.delivery {
        DeliveryMode::Directory { frame_dir } => frame_dir.clone(),
        DeliveryMode::Stream => panic!("expected directory delivery"),
    }
}

struct FailingSource;

impl CaptureSource for FailingSource {
    fn capture(&self, _req: &CaptureRequest, _sink: &dyn FrameSink) -> PagecutResult<()> {
        Err(PagecutError::capture("renderer crashed"))
    }
}

#[test]
fn directory_mode_success_removes_the_frame_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = write_stub_encoder(tmp.path(), "encoder-ok.sh", "#!/bin/sh\nexit 0\n");

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(6),
            fps: Some(30.0),
            threads: Some(3),
            encoder_path: Some(encoder),
            ..RawOptions::default()
        },
    );
    let frame_dir = frame_dir_of(&cfg);

    run_pipeline(&cfg, &TestPatternSource, None).unwrap();
    assert!(!frame_dir.exists());
}

#[test]
fn keep_frames_retains_every_numbered_file() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = write_stub_encoder(tmp.path(), "encoder-ok.sh", "#!/bin/sh\nexit 0\n");

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(6),
            fps: Some(30.0),
            threads: Some(3),
            keep_frames: true,
            encoder_path: Some(encoder),
            ..RawOptions::default()
        },
    );
    let frame_dir = frame_dir_of(&cfg);

    run_pipeline(&cfg, &TestPatternSource, None).unwrap();

    assert!(frame_dir.is_dir());
    for frame in 1..=6u64 {
        let name = format!("image-{frame:09}.png");
        assert!(frame_dir.join(&name).is_file(), "missing {name}");
    }
    assert_eq!(fs::read_dir(&frame_dir).unwrap().count(), 6);
}

#[test]
fn encoder_failure_surfaces_after_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = write_stub_encoder(tmp.path(), "encoder-fail.sh", "#!/bin/sh\nexit 3\n");

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(4),
            fps: Some(30.0),
            encoder_path: Some(encoder),
            ..RawOptions::default()
        },
    );
    let frame_dir = frame_dir_of(&cfg);

    let err = run_pipeline(&cfg, &TestPatternSource, None).unwrap_err();
    assert!(matches!(err, PagecutError::EncoderExit(_)));
    // Cleanup still ran.
    assert!(!frame_dir.exists());
}

#[test]
fn encoder_spawn_failure_surfaces_after_cleanup() {
    let tmp = tempfile::tempdir().unwrap();

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(2),
            fps: Some(30.0),
            encoder_path: Some(tmp.path().join("no-such-encoder")),
            ..RawOptions::default()
        },
    );
    let frame_dir = frame_dir_of(&cfg);

    let err = run_pipeline(&cfg, &TestPatternSource, None).unwrap_err();
    assert!(matches!(err, PagecutError::EncoderSpawn(_)));
    assert!(!frame_dir.exists());
}

#[test]
fn capture_failure_skips_the_encoder_but_still_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("encoder-ran");
    let encoder = write_stub_encoder(
        tmp.path(),
        "encoder-marker.sh",
        &format!("#!/bin/sh\ntouch '{}'\nexit 0\n", marker.display()),
    );

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(4),
            fps: Some(30.0),
            threads: Some(2),
            encoder_path: Some(encoder),
            ..RawOptions::default()
        },
    );
    let frame_dir = frame_dir_of(&cfg);

    let err = run_pipeline(&cfg, &FailingSource, None).unwrap_err();
    assert!(matches!(err, PagecutError::Capture(_)));
    assert!(!marker.exists(), "encoder must not run on partial frames");
    assert!(!frame_dir.exists());
}

#[test]
fn stream_mode_delivers_frame_bytes_in_index_order() {
    let tmp = tempfile::tempdir().unwrap();
    let received = tmp.path().join("received.bin");
    let encoder = write_stub_encoder(
        tmp.path(),
        "encoder-copy.sh",
        &format!("#!/bin/sh\ncat > '{}'\n", received.display()),
    );

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(4),
            fps: Some(30.0),
            pipe_mode: true,
            // Forced down to one producer for stream delivery.
            threads: Some(4),
            encoder_path: Some(encoder),
            ..RawOptions::default()
        },
    );
    assert_eq!(cfg.delivery, DeliveryMode::Stream);
    assert_eq!(cfg.worker_count, 1);

    run_pipeline(&cfg, &TestPatternSource, None).unwrap();

    // The same source driven into a memory sink yields the expected bytes.
    let sink = MemorySink::new();
    let req = CaptureRequest {
        target: cfg.target.clone(),
        framerate: cfg.framerate,
        total_frames: cfg.total_frames,
        range: pagecut::FrameRange { start: 1, end: 4 },
        image_format: cfg.image_format,
    };
    TestPatternSource.capture(&req, &sink).unwrap();
    let expected: Vec<u8> = sink
        .frames()
        .into_iter()
        .flat_map(|(_, bytes)| bytes)
        .collect();

    assert_eq!(fs::read(&received).unwrap(), expected);
}

#[test]
fn zero_frames_settles_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = write_stub_encoder(tmp.path(), "encoder-ok.sh", "#!/bin/sh\nexit 0\n");

    let cfg = resolve(
        tmp.path(),
        RawOptions {
            frames: Some(0),
            fps: Some(30.0),
            threads: Some(3),
            encoder_path: Some(encoder),
            ..RawOptions::default()
        },
    );
    let frame_dir = frame_dir_of(&cfg);

    run_pipeline(&cfg, &TestPatternSource, None).unwrap();
    assert!(!frame_dir.exists());
}
