//! End-to-end pipeline scenarios over synthetic sources.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{
    find_files, make_dsf, make_dst_dff, wav_data_len, RecordingSink, FRAME_BYTES,
};
use dsdfmt::{Compression, DsdiffFile, DsfFile};
use dsdmeta::AlbumInfo;
use dsdpipe::nodes::cue_sink::CueSheetSink;
use dsdpipe::nodes::dsdiff_source::DsdiffFileSource;
use dsdpipe::nodes::dsf_sink::{DsfSinkConfig, DsfTrackSink};
use dsdpipe::nodes::dsf_source::DsfFileSource;
use dsdpipe::nodes::edit_master_sink::{DsdiffEditMasterSink, EditMasterConfig};
use dsdpipe::nodes::sacd_source::SacdDiscSource;
use dsdpipe::nodes::wav_sink::{WavSinkConfig, WavTrackSink};
use dsdpipe::nodes::xml_sink::XmlDumpSink;
use dsdpipe::nodes::SinkCapability;
use dsdpipe::{
    PcmBitDepth, Pipeline, PipelineError, PipelineOptions, ProgressAction,
};
use dsdsacd::testkit::{ImageBuilder, ScriptedDrive};
use dsdsacd::AuthenticatedDriveSource;

fn dsf_sink(base: &std::path::Path) -> DsfTrackSink {
    DsfTrackSink::new(DsfSinkConfig {
        base_dir: base.to_path_buf(),
        track_policy: Default::default(),
        album_policy: Default::default(),
        write_id3: true,
    })
}

fn wav_sink(base: &std::path::Path, depth: PcmBitDepth) -> WavTrackSink {
    WavTrackSink::new(WavSinkConfig {
        base_dir: base.to_path_buf(),
        bit_depth: depth,
        track_policy: Default::default(),
        album_policy: Default::default(),
        write_metadata: true,
    })
}

/// Scenario: container-to-container round trip. Audio written through the
/// little-endian container, re-read, written through the big-endian one,
/// and compared byte-for-byte (the two bit-order reversals cancel).
#[tokio::test]
async fn format_round_trip_preserves_audio_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dsf");
    // Two seconds of stereo at 64 FS.
    let original = make_dsf(&src_path, 150);

    let out_base = dir.path().join("out");
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline
        .set_source(Box::new(DsfFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline
        .add_sink(Box::new(DsdiffEditMasterSink::new(EditMasterConfig {
            base_dir: out_base.clone(),
            album_policy: Default::default(),
            compressed_passthrough: false,
        })))
        .unwrap();
    pipeline.run(CancellationToken::new()).await.unwrap();

    let produced = find_files(&out_base, "dff");
    assert_eq!(produced.len(), 1);
    let mut dff = DsdiffFile::open(&produced[0]).unwrap();
    let mut first = vec![0u8; 1000];
    dff.read_audio(&mut first).unwrap();
    assert_eq!(&first[..], &original[..1000]);
}

/// Scenario: compressed passthrough into an edit master. Every coded
/// frame lands verbatim, with the frame index chunk written.
#[tokio::test]
async fn compressed_passthrough_preserves_frames_and_writes_an_index() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    // One track, 450 coded frames: six seconds at 75 fps.
    let frames = make_dst_dff(&src_path, &[450]);

    let out_base = dir.path().join("out");
    let mut options = PipelineOptions::default();
    options.write_compressed_passthrough = true;
    let mut pipeline = Pipeline::new(options);
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline
        .add_sink(Box::new(DsdiffEditMasterSink::new(EditMasterConfig {
            base_dir: out_base.clone(),
            album_policy: Default::default(),
            compressed_passthrough: true,
        })))
        .unwrap();
    pipeline.run(CancellationToken::new()).await.unwrap();

    let produced = find_files(&out_base, "dff");
    assert_eq!(produced.len(), 1);
    let mut out = DsdiffFile::open(&produced[0]).unwrap();
    assert_eq!(out.compression(), Compression::Dst);
    assert_eq!(out.frame_count(), 450);
    assert!(out.has_index());

    let mut read_back = Vec::new();
    while let Some(frame) = out.read_dst_frame().unwrap() {
        assert!(frame.crc.is_some());
        read_back.push(frame.data);
    }
    assert_eq!(read_back, frames);
}

/// Scenario: decompress and split. A compressed three-track source fans
/// out to per-track container files and 24-bit WAV files; the
/// decompressor transform is inserted on demand and every WAV's duration
/// matches its track.
#[tokio::test]
async fn decompress_and_split_to_containers_and_wav() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    let track_frames = [15usize, 30, 15];
    make_dst_dff(&src_path, &track_frames);

    let out_base = dir.path().join("out");
    let mut options = PipelineOptions::default();
    options.pcm_sample_rate = 88_200;
    options.pcm_bit_depth = PcmBitDepth::B24;
    let mut pipeline = Pipeline::new(options);
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline.add_sink(Box::new(dsf_sink(&out_base))).unwrap();
    pipeline
        .add_sink(Box::new(wav_sink(&out_base, PcmBitDepth::B24)))
        .unwrap();
    let summary = pipeline.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.tracks_completed, 3);

    let dsf_files = find_files(&out_base, "dsf");
    let wav_files = find_files(&out_base, "wav");
    assert_eq!(dsf_files.len(), 3);
    assert_eq!(wav_files.len(), 3);

    for (path, &frames) in wav_files.iter().zip(&track_frames) {
        let (rate, data_len) = wav_data_len(path);
        assert_eq!(rate, 88_200);
        // frames/75 seconds at 88.2 kHz, stereo, 3 bytes per sample.
        let expected = (frames as u32 * 88_200 / 75) * 2 * 3;
        assert_eq!(data_len, expected, "duration mismatch for {path:?}");
    }

    // The per-track container files carry the decoded passthrough bodies.
    let mut decoded = DsfFile::open(&dsf_files[0]).unwrap();
    let mut head = vec![0u8; 64];
    decoded.read_audio(&mut head).unwrap();
    let expected = common::passthrough_frame(0);
    assert_eq!(&head[..], &expected[1..65]);
}

/// Scenario: disc-image source behind drive authentication, selecting a
/// subset of tracks into an edit master with markers at track starts.
#[tokio::test]
async fn disc_image_selection_into_edit_master() {
    let dir = tempfile::tempdir().unwrap();
    let durations = [30u64, 45, 15, 60, 30];
    let mut builder = ImageBuilder::new(2_822_400, 2).album(AlbumInfo {
        title: Some("Disc Album".into()),
        artist: Some("Disc Artist".into()),
        ..Default::default()
    });
    for (i, &frames) in durations.iter().enumerate() {
        builder = builder.track(&format!("Track {}", i + 1), "Disc Artist", None, frames);
    }
    let image = builder.build();

    let drive = ScriptedDrive::new(&image, [0x42; 16]);
    let source = AuthenticatedDriveSource::open(drive).unwrap();
    let disc = SacdDiscSource::open(source, Default::default()).unwrap();
    assert_eq!(disc_track_count(&disc), 5);

    let out_base = dir.path().join("out");
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline.set_source(Box::new(disc)).unwrap();
    pipeline.select_tracks("1,3,5").unwrap();
    pipeline
        .add_sink(Box::new(DsdiffEditMasterSink::new(EditMasterConfig {
            base_dir: out_base.clone(),
            album_policy: Default::default(),
            compressed_passthrough: false,
        })))
        .unwrap();
    let summary = pipeline.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.tracks_completed, 3);

    let produced = find_files(&out_base, "dff");
    assert_eq!(produced.len(), 1);
    let out = DsdiffFile::open(&produced[0]).unwrap();

    // Markers at the concatenated offsets of tracks 1, 3, 5.
    let samples_per_frame = 37_632u64;
    let expected_offsets = [
        0,
        durations[0] * samples_per_frame,
        (durations[0] + durations[2]) * samples_per_frame,
    ];
    let offsets: Vec<u64> = out
        .metadata()
        .markers
        .iter()
        .map(|m| m.offset_samples)
        .collect();
    assert_eq!(offsets, expected_offsets);

    let expected_audio =
        (durations[0] + durations[2] + durations[4]) * FRAME_BYTES as u64;
    assert_eq!(out.audio_len(), expected_audio);
}

fn disc_track_count<S: dsdsacd::SectorSource>(source: &SacdDiscSource<S>) -> u32 {
    use dsdpipe::nodes::FrameSource;
    source.track_count()
}

/// Scenario: cancellation mid-run. The current track ends cleanly,
/// remaining tracks are skipped, finalize still runs, and the result is
/// the cancelled error.
#[tokio::test]
async fn cancellation_finalizes_completed_tracks_only() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    make_dst_dff(&src_path, &[15; 10]);

    let out_base = dir.path().join("out");
    let mut options = PipelineOptions::default();
    options.pcm_sample_rate = 88_200;
    let mut pipeline = Pipeline::new(options);
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline.add_sink(Box::new(dsf_sink(&out_base))).unwrap();
    pipeline
        .add_sink(Box::new(wav_sink(&out_base, PcmBitDepth::B24)))
        .unwrap();
    let (recording, log) = RecordingSink::new(SinkCapability::MetadataOnly);
    pipeline.add_sink(Box::new(recording)).unwrap();

    // Ask for cancellation once the second track has completed.
    let last_full_track = Arc::new(AtomicU32::new(0));
    let seen = last_full_track.clone();
    pipeline
        .on_progress(Box::new(move |snapshot| {
            if snapshot.track_percent >= 100.0 {
                seen.fetch_max(snapshot.track, Ordering::SeqCst);
            }
            if seen.load(Ordering::SeqCst) >= 2 {
                ProgressAction::Cancel
            } else {
                ProgressAction::Continue
            }
        }))
        .unwrap();

    let result = pipeline.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(PipelineError::Cancelled)));

    assert_eq!(find_files(&out_base, "dsf").len(), 2);
    assert_eq!(find_files(&out_base, "wav").len(), 2);

    // The instrumented sink saw a fully balanced lifecycle.
    log.assert_contract();
    assert_eq!(log.tracks_started(), vec![1, 2]);
}

/// Negotiation conflicts are rejected at configure time.
#[tokio::test]
async fn passthrough_conflicts_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    make_dst_dff(&src_path, &[15]);

    // Passthrough sink plus a PCM sink on a compressed source.
    let mut options = PipelineOptions::default();
    options.pcm_sample_rate = 88_200;
    options.write_compressed_passthrough = true;
    let mut pipeline = Pipeline::new(options);
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline
        .add_sink(Box::new(DsdiffEditMasterSink::new(EditMasterConfig {
            base_dir: dir.path().join("out"),
            album_policy: Default::default(),
            compressed_passthrough: true,
        })))
        .unwrap();
    pipeline
        .add_sink(Box::new(wav_sink(&dir.path().join("out"), PcmBitDepth::B24)))
        .unwrap();
    let result = pipeline.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(PipelineError::InvalidArg(_))));

    // Passthrough sink on a raw source.
    let dsf_path = dir.path().join("raw.dsf");
    make_dsf(&dsf_path, 15);
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline
        .set_source(Box::new(DsfFileSource::open(&dsf_path).unwrap()))
        .unwrap();
    pipeline
        .add_sink(Box::new(DsdiffEditMasterSink::new(EditMasterConfig {
            base_dir: dir.path().join("out2"),
            album_policy: Default::default(),
            compressed_passthrough: true,
        })))
        .unwrap();
    let result = pipeline.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(PipelineError::InvalidArg(_))));
}

/// Track selection is validated against the source at configure time.
#[tokio::test]
async fn track_selection_bounds_are_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    make_dst_dff(&src_path, &[15, 15, 15]);

    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    assert!(pipeline.select_tracks("0").is_err());
    assert!(pipeline.select_tracks("4").is_err());
    // Reversed ranges normalise.
    pipeline.select_tracks("3-1").unwrap();
}

/// Metadata sinks observe the run alongside audio sinks and the progress
/// stream stays monotone to 100.
#[tokio::test]
async fn metadata_sinks_and_progress_cover_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    make_dst_dff(&src_path, &[15, 15]);

    let cue_path = dir.path().join("album.cue");
    let xml_path = dir.path().join("album.xml");

    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline
        .add_sink(Box::new(dsf_sink(&dir.path().join("out"))))
        .unwrap();
    pipeline
        .add_sink(Box::new(CueSheetSink::new(&cue_path, "album.dff")))
        .unwrap();
    pipeline
        .add_sink(Box::new(XmlDumpSink::new(&xml_path)))
        .unwrap();

    let totals = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = totals.clone();
    pipeline
        .on_progress(Box::new(move |snapshot| {
            seen.lock().unwrap().push(snapshot.total_percent);
            ProgressAction::Continue
        }))
        .unwrap();

    pipeline.run(CancellationToken::new()).await.unwrap();

    let cue = std::fs::read_to_string(&cue_path).unwrap();
    assert!(cue.contains("TRACK 01 AUDIO"));
    assert!(cue.contains("TRACK 02 AUDIO"));
    let xml = std::fs::read_to_string(&xml_path).unwrap();
    assert!(xml.contains("<tracks>"));

    let totals = totals.lock().unwrap();
    assert!(totals.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(totals.last().copied(), Some(100.0));
}

/// A pipeline can be reset and run again after ending; sinks with
/// per-run state (the edit master finalizes once per run) come back
/// clean on the second run.
#[tokio::test]
async fn reset_allows_a_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dsf");
    make_dsf(&src_path, 15);

    let out_base = dir.path().join("out1");
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline
        .set_source(Box::new(DsfFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline.add_sink(Box::new(dsf_sink(&out_base))).unwrap();
    pipeline
        .add_sink(Box::new(DsdiffEditMasterSink::new(EditMasterConfig {
            base_dir: out_base.clone(),
            album_policy: Default::default(),
            compressed_passthrough: false,
        })))
        .unwrap();
    pipeline.run(CancellationToken::new()).await.unwrap();

    // Ended: configuring or re-running is illegal until reset.
    assert!(pipeline
        .run(CancellationToken::new())
        .await
        .is_err());
    pipeline.reset().unwrap();
    pipeline.run(CancellationToken::new()).await.unwrap();

    // Both runs produced complete artifacts, collision-suffixed apart.
    assert_eq!(find_files(&out_base, "dsf").len(), 2);
    let masters = find_files(&out_base, "dff");
    assert_eq!(masters.len(), 2);
    for path in &masters {
        let master = DsdiffFile::open(path).unwrap();
        assert_eq!(master.metadata().markers.len(), 1);
    }
}

/// The background handle stops a run cooperatively.
#[tokio::test]
async fn handle_stop_cancels_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("source.dff");
    make_dst_dff(&src_path, &[15; 20]);

    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline
        .set_source(Box::new(DsdiffFileSource::open(&src_path).unwrap()))
        .unwrap();
    pipeline
        .add_sink(Box::new(dsf_sink(&dir.path().join("out"))))
        .unwrap();

    let handle = pipeline.start();
    handle.stop();
    let (_pipeline, result) = handle.wait().await;
    // Either the run was cancelled in flight or it finished before the
    // stop landed; both leave valid outputs.
    match result {
        Err(PipelineError::Cancelled) | Ok(_) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}
