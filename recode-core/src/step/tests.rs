use std::fs::File;
use std::path::Path;

use crate::encoder::FfmpegEncoder;
use crate::mkvmerge::MkvmergeMode;
use crate::probe::{MediaFile, Stream};

use super::*;

fn video_file(name: &str) -> MediaFile {
    MediaFile::from_probe_json(
        Path::new(name),
        r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264"},
                {"index": 1, "codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {}
        }"#,
    )
    .unwrap()
}

fn video_stream() -> Stream {
    video_file("in.mkv").streams()[0].clone()
}

fn workdir() -> (tempfile::TempDir, Arc<WorkingDirectory>) {
    let tmp = tempfile::tempdir().unwrap();
    let wd = WorkingDirectory::create(&tmp.path().join("in.mkv")).unwrap();
    (tmp, Arc::new(wd))
}

fn transcode_params() -> TranscodeParams {
    TranscodeParams {
        input: video_stream(),
        input_opt: InputOptions::default(),
        encoder: FfmpegEncoder::new("libx264"),
        ffmpeg_opt: FfmpegOptions::default(),
    }
}

#[test]
fn mkvmerge_step_requires_inputs() {
    let err = MkvmergeStep::new(MkvmergeParams {
        inputs: vec![],
        output: "out.mkv".into(),
        mode: MkvmergeMode::Merge,
        executable: None,
    })
    .unwrap_err();
    assert!(matches!(err, ParameterError::Missing("inputs")));
}

#[test]
fn mkvmerge_step_requires_an_mkv_output() {
    let err = MkvmergeStep::new(MkvmergeParams {
        inputs: vec![video_stream()],
        output: "out.mp4".into(),
        mode: MkvmergeMode::Merge,
        executable: None,
    })
    .unwrap_err();
    assert!(matches!(err, ParameterError::Invalid { name: "output", .. }));
}

#[test]
fn mkvmerge_step_refuses_to_overwrite() {
    let tmp = tempfile::tempdir().unwrap();
    let existing = tmp.path().join("done.mkv");
    File::create(&existing).unwrap();

    let err = MkvmergeStep::new(MkvmergeParams {
        inputs: vec![video_stream()],
        output: existing,
        mode: MkvmergeMode::Merge,
        executable: None,
    })
    .unwrap_err();
    assert!(matches!(err, ParameterError::Invalid { name: "output", .. }));
}

#[test]
fn mkvmerge_step_accepts_sane_parameters() {
    let tmp = tempfile::tempdir().unwrap();
    let step = MkvmergeStep::new(MkvmergeParams {
        inputs: vec![video_stream()],
        output: tmp.path().join("out.mkv"),
        mode: MkvmergeMode::Join,
        executable: Some("mkvmerge".to_owned()),
    });
    assert!(step.is_ok());
}

#[test]
fn transcode_step_rejects_mismatched_encoders() {
    let (_tmp, wd) = workdir();
    let mut params = transcode_params();
    // an audio codec cannot encode the video stream
    params.encoder = FfmpegEncoder::new("libopus");
    let err = TranscodeStep::new(params, wd).unwrap_err();
    assert!(matches!(err, ParameterError::Invalid { name: "encoder", .. }));
}

#[test]
fn transcode_step_rejects_broken_frame_rates() {
    let (_tmp, wd) = workdir();
    let mut params = transcode_params();
    params.input_opt.fix_fps = Some(0.0);
    let err = TranscodeStep::new(params, wd).unwrap_err();
    assert!(matches!(err, ParameterError::Invalid { name: "fix_fps", .. }));
}

#[test]
fn transcode_step_accepts_sane_parameters() {
    let (_tmp, wd) = workdir();
    assert!(TranscodeStep::new(transcode_params(), wd).is_ok());
}

#[test]
fn two_pass_step_parses_human_bitrates() {
    let (_tmp, wd) = workdir();
    for bitrate in ["2000k", "1.2M"] {
        let step = TwoPassStep::new(
            TwoPassParams {
                transcode: transcode_params(),
                target_bitrate: serde_yaml::Value::from(bitrate),
                pass_log: None,
            },
            Arc::clone(&wd),
        );
        assert!(step.is_ok(), "bitrate {bitrate} should be accepted");
    }
}

#[test]
fn two_pass_step_rejects_unparseable_bitrates() {
    let (_tmp, wd) = workdir();
    let err = TwoPassStep::new(
        TwoPassParams {
            transcode: transcode_params(),
            target_bitrate: serde_yaml::Value::from("fast"),
            pass_log: None,
        },
        wd,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ParameterError::Invalid { name: "target_bitrate", .. }
    ));
}

#[test]
fn results_are_not_available_before_a_run() {
    let (_tmp, wd) = workdir();
    let mut step = TranscodeStep::new(transcode_params(), wd).unwrap();
    assert!(matches!(
        step.take_result().unwrap_err(),
        StepError::ResultNotReady
    ));
}

#[test]
fn captured_stdio_stays_printable_when_utf8() {
    let printable: StringOrBytes = b"frame=  100".to_vec().into();
    assert_eq!(format!("{printable:?}"), "frame=  100");

    let binary: StringOrBytes = vec![0xff, 0xfe, 0x00].into();
    assert!(format!("{binary:?}").starts_with("raw bytes:"));
}
