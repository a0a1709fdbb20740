use std::io::Write;
use std::path::Path;

use chrono::Utc;
use strobe_camera::{CaptureMode, PixelFormat};
use strobe_project::sequence::PersistedSequence;
use strobe_project::waterfall::WaterfallWriter;
use strobe_project::{
    frame_file_name, FrameIndexRecord, ProjectError, SessionMeta, SessionState, TrailingLines,
    SESSION_META_VERSION,
};

fn base_meta(session: &Path, mode: CaptureMode, width: u32, height: u32) -> SessionMeta {
    SessionMeta {
        session_path: session.to_path_buf(),
        version: SESSION_META_VERSION,
        mode,
        width,
        height,
        pixel_format: PixelFormat::Mono8,
        exposure_us: 100.0,
        gain_db: 0.0,
        fps_cap: None,
        started_at: Utc::now(),
        ended_at: Some(Utc::now()),
        captured: 0,
        dropped: 0,
        write_failed: 0,
        state: SessionState::Sealed,
    }
}

/// Area session with the given persisted indices (gaps = dropped units).
fn write_area_session(session: &Path, indices: &[u64], width: u32, height: u32) {
    let mut meta = base_meta(session, CaptureMode::Area, width, height);
    meta.captured = indices.len() as u64;
    meta.save_for_session().unwrap();

    std::fs::create_dir_all(meta.frames_dir()).unwrap();
    let mut index_file = std::fs::File::create(meta.frames_index_path()).unwrap();
    for &index in indices {
        let payload = vec![index as u8; (width * height) as usize];
        std::fs::write(meta.frames_dir().join(frame_file_name(index)), payload).unwrap();
        let record = FrameIndexRecord {
            index,
            timestamp_ns: index * 1_000,
        };
        writeln!(index_file, "{}", serde_json::to_string(&record).unwrap()).unwrap();
    }
}

fn write_waterfall_session(session: &Path, lines: u64, width: u32) {
    let mut meta = base_meta(session, CaptureMode::Waterfall, width, 1);
    meta.captured = lines;
    meta.save_for_session().unwrap();

    let mut writer = WaterfallWriter::create(&meta.waterfall_path(), width, PixelFormat::Mono8)
        .unwrap();
    for i in 0..lines {
        writer.append(i, i * 10, &vec![i as u8; width as usize]).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn area_sequence_yields_frames_in_index_order() {
    let dir = tempfile::tempdir().unwrap();
    // Index 2 was dropped at capture time.
    write_area_session(dir.path(), &[0, 1, 3, 4], 8, 4);

    let sequence = PersistedSequence::open_area(dir.path()).unwrap();
    assert_eq!(sequence.len(), 4);
    assert_eq!(sequence.dims().frame_byte_len(), 32);

    let frames: Vec<_> = sequence.frames().unwrap().map(Result::unwrap).collect();
    assert_eq!(frames.len(), 4);
    // Output ordinals are contiguous even across the dropped unit.
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.index, i as u64);
    }
    // The payload of the third emitted frame came from persisted index 3.
    assert!(frames[2].data.iter().all(|&b| b == 3));
}

#[test]
fn area_sequence_rejects_waterfall_session() {
    let dir = tempfile::tempdir().unwrap();
    write_waterfall_session(dir.path(), 6, 8);

    assert!(matches!(
        PersistedSequence::open_area(dir.path()),
        Err(ProjectError::WrongMode { .. })
    ));
}

#[test]
fn area_sequence_flags_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    write_area_session(dir.path(), &[0, 1], 8, 4);

    // Truncate one frame file behind the index's back.
    std::fs::write(dir.path().join("frames").join(frame_file_name(1)), [0u8; 5]).unwrap();

    let sequence = PersistedSequence::open_area(dir.path()).unwrap();
    let results: Vec<_> = sequence.frames().unwrap().collect();
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(ProjectError::CorruptFrame { index: 1, .. })
    ));
}

#[test]
fn waterfall_sequence_counts_frames_per_policy() {
    let dir = tempfile::tempdir().unwrap();
    write_waterfall_session(dir.path(), 10, 8);

    let discard =
        PersistedSequence::open_waterfall(dir.path(), 4, TrailingLines::Discard).unwrap();
    assert_eq!(discard.len(), 2);

    let keep =
        PersistedSequence::open_waterfall(dir.path(), 4, TrailingLines::KeepPartial).unwrap();
    assert_eq!(keep.len(), 3);
}

#[test]
fn waterfall_frames_are_padded_to_uniform_size() {
    let dir = tempfile::tempdir().unwrap();
    write_waterfall_session(dir.path(), 10, 8);

    let sequence =
        PersistedSequence::open_waterfall(dir.path(), 4, TrailingLines::KeepPartial).unwrap();
    let expected = sequence.dims().frame_byte_len();

    let frames: Vec<_> = sequence.frames().unwrap().map(Result::unwrap).collect();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.data.len() == expected));

    // The padded tail of the partial frame is zeroed.
    let tail = &frames[2].data[2 * 8..];
    assert!(tail.iter().all(|&b| b == 0));
}

#[test]
fn capturing_area_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_area_session(dir.path(), &[0, 1], 8, 4);

    // Flip the metadata back to a live capture; the files may be mid-append.
    let mut meta = base_meta(dir.path(), CaptureMode::Area, 8, 4);
    meta.state = SessionState::Capturing;
    meta.ended_at = None;
    meta.save_for_session().unwrap();

    assert!(matches!(
        PersistedSequence::open_area(dir.path()),
        Err(ProjectError::SessionActive)
    ));
}

#[test]
fn capturing_waterfall_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_waterfall_session(dir.path(), 6, 8);

    let mut meta = base_meta(dir.path(), CaptureMode::Waterfall, 8, 1);
    meta.state = SessionState::Capturing;
    meta.ended_at = None;
    meta.save_for_session().unwrap();

    assert!(matches!(
        PersistedSequence::open_waterfall(dir.path(), 4, TrailingLines::Discard),
        Err(ProjectError::SessionActive)
    ));
}

#[test]
fn waterfall_rows_keep_line_order() {
    let dir = tempfile::tempdir().unwrap();
    write_waterfall_session(dir.path(), 8, 4);

    let sequence =
        PersistedSequence::open_waterfall(dir.path(), 4, TrailingLines::Discard).unwrap();
    let frames: Vec<_> = sequence.frames().unwrap().map(Result::unwrap).collect();

    assert_eq!(frames.len(), 2);
    for (row, chunk) in frames[1].data.chunks(4).enumerate() {
        assert!(chunk.iter().all(|&b| b == 4 + row as u8));
    }
}
