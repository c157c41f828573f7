//! Tests for tar archive transport.

use super::*;
use std::fs;

use rstest::rstest;
use tempfile::TempDir;

use crate::test_support::ScriptedToolRunner;
use crate::tool::{ProcessToolRunner, ToolError};

fn utf8_tempdir() -> (TempDir, Utf8PathBuf) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    (tmp, base)
}

#[rstest]
fn stdio_stream_wires_process_streams() {
    let runner = ScriptedToolRunner::new();
    runner.push_successes(2);
    let staging = Utf8Path::new("/staging");

    write_archive(&runner, "tar", staging, &ArchiveStream::Stdio).expect("write");
    read_archive(&runner, "tar", staging, &ArchiveStream::Stdio).expect("read");

    let calls = runner.invocations();
    let io: Vec<ToolIo> = calls.iter().map(|call| call.io.clone()).collect();
    assert_eq!(
        io,
        vec![
            ToolIo::writing_to(StdoutSink::Inherit),
            ToolIo::reading_from(StdinSource::Inherit),
        ]
    );
    assert_eq!(
        runner.command_strings(),
        vec!["tar -c -C /staging -f - .", "tar -x -C /staging -f -"]
    );
}

#[rstest]
fn failing_tar_is_a_transport_error() {
    let runner = ScriptedToolRunner::new();
    runner.push_exit_code(2);

    let err = write_archive(
        &runner,
        "tar",
        Utf8Path::new("/staging"),
        &ArchiveStream::Stdio,
    )
    .expect_err("tar fails");

    assert!(
        matches!(
            err,
            PipelineError::Transport(ToolError::Execution { status: Some(2), .. })
        ),
        "unexpected error: {err}"
    );
    assert!(err.to_string().starts_with("archive transport failed"));
}

#[rstest]
fn archive_file_round_trips_through_tar() {
    let (_tmp, base) = utf8_tempdir();
    let source = base.join("source");
    fs::create_dir_all(source.join("app").join("users")).expect("source tree");
    fs::write(
        source.join("app").join("users").join("mc-1-big-Data.db"),
        b"rows",
    )
    .expect("source file");
    let target = base.join("target");
    fs::create_dir_all(&target).expect("target dir");
    let archive = ArchiveStream::File(base.join("backup.tar"));

    write_archive(&ProcessToolRunner, "tar", &source, &archive).expect("write");
    read_archive(&ProcessToolRunner, "tar", &target, &archive).expect("read");

    let restored = fs::read(target.join("app").join("users").join("mc-1-big-Data.db"))
        .expect("restored file");
    assert_eq!(restored, b"rows");
}

#[rstest]
fn missing_archive_file_is_a_transport_error() {
    let (_tmp, base) = utf8_tempdir();
    let archive = ArchiveStream::File(base.join("absent.tar"));

    let err = read_archive(&ProcessToolRunner, "tar", &base, &archive).expect_err("no archive");

    assert!(matches!(
        err,
        PipelineError::Transport(ToolError::Redirect { .. })
    ));
}
