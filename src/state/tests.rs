use super::*;
use crate::archive::ArchiveFile;
use crate::observability::MemorySink;
use crate::schema::StageColumns;
use crate::types::column::Column;
use crate::types::detection::Detection;
use crate::types::metadata::ImageMetadata;
use ndarray::array;
use std::fs;
use std::path::PathBuf;

fn tracking_set() -> TrackingSet {
    TrackingSet::new(
        vec![
            VideoMetadata {
                id: 1,
                name: Some("first".into()),
                nframes: Some(1),
            },
            VideoMetadata {
                id: 2,
                name: Some("second".into()),
                nframes: Some(1),
            },
        ],
        vec![
            ImageMetadata {
                id: 10,
                video_id: 1,
                ..Default::default()
            },
            ImageMetadata {
                id: 20,
                video_id: 2,
                ..Default::default()
            },
        ],
    )
}

fn records(video_id: VideoId, image_id: u64, conf: f64) -> Detections {
    Detections::from_rows(vec![Detection {
        bbox_ltwh: Some([1.0, 2.0, 3.0, 4.0]),
        bbox_conf: Some(conf),
        keypoints_xyc: Some(array![[1.0, 2.0, conf]]),
        ..Detection::new(image_id, image_id, video_id)
    }])
}

fn state_with(
    tracking_set: TrackingSet,
    config: TrackStateConfig,
    stages: &[StageColumns],
) -> (TrackerState, MemorySink) {
    let sink = MemorySink::new();
    let state = TrackerState::new(tracking_set, config, stages, Rc::new(sink.clone())).unwrap();
    (state, sink)
}

fn archive_config(path: &Path) -> TrackStateConfig {
    TrackStateConfig {
        load_file: Some(path.to_path_buf()),
        save_file: Some(path.to_path_buf()),
        ..Default::default()
    }
}

fn empty_archive(dir: &Path) -> PathBuf {
    let path = dir.join("states.tsa");
    ArchiveFile::open_append(&path).unwrap();
    path
}

#[test]
fn test_saved_video_is_loaded_by_the_next_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = empty_archive(dir.path());
    let processed = records(1, 10, 0.7);

    {
        let (mut state, _) = state_with(tracking_set(), archive_config(&path), &[]);
        let mut session = state.open().unwrap();
        let mut scope = session.select(1);
        assert!(scope.load().unwrap().is_empty());
        scope.update(processed.clone());
        assert_eq!(scope.save().unwrap(), Some(PutOutcome::Written));
    }

    let (mut state, _) = state_with(tracking_set(), archive_config(&path), &[]);
    let mut session = state.open().unwrap();
    let mut scope = session.select(1);
    let loaded = scope.load().unwrap();
    assert_eq!(loaded.rows(), processed.rows());
    assert_eq!(loaded.columns(), processed.columns());
}

#[test]
fn test_second_save_of_a_video_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackStateConfig {
        save_file: Some(dir.path().join("out").join("states.tsa")),
        ..Default::default()
    };
    let (mut state, sink) = state_with(tracking_set(), config, &[]);

    let mut session = state.open().unwrap();
    let mut scope = session.select(1);
    scope.update(records(1, 10, 0.9));
    assert_eq!(scope.save().unwrap(), Some(PutOutcome::Written));
    scope.update(records(1, 10, 0.1));
    assert_eq!(scope.save().unwrap(), Some(PutOutcome::AlreadyPresent));

    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, Diagnostic::DuplicateEntrySkipped { video_id: 1, .. })));
    assert_eq!(scope.saved_videos(), vec![1]);
}

#[test]
fn test_update_replaces_only_the_given_video() {
    let (mut state, _) = state_with(tracking_set(), TrackStateConfig::default(), &[]);
    let a = records(1, 10, 0.1);
    let b = records(2, 20, 0.2);
    let a_prime = Detections::from_rows(vec![
        Detection::new(100, 10, 1),
        Detection {
            track_id: Some(4),
            ..Detection::new(101, 10, 1)
        },
    ]);

    state.update(1, a);
    state.update(2, b.clone());
    state.update(1, a_prime.clone());

    let table = state.detections().unwrap();
    assert_eq!(table.for_video(2).rows(), b.rows());
    assert_eq!(table.for_video(1).rows(), a_prime.rows());
    assert!(table.has_column(Column::TrackId));
    assert!(table.has_column(Column::KeypointsXyc));
}

#[test]
fn test_forget_columns_are_dropped_when_the_session_ends() {
    let stages = vec![
        StageColumns::new("reid", &[], &[Column::Embeddings]).forgetting(&[Column::Embeddings]),
        StageColumns::new("track", &[Column::Embeddings], &[Column::TrackId]),
    ];
    let (mut state, _) = state_with(tracking_set(), TrackStateConfig::default(), &stages);

    {
        let mut session = state.open().unwrap();
        let mut scope = session.select(1);
        let mut rows = records(1, 10, 0.5).into_rows();
        rows[0].embeddings = Some(vec![0.1, 0.2]);
        scope.update(Detections::from_rows(rows));
        assert!(scope.detections().unwrap().has_column(Column::Embeddings));
        drop(scope);
        session.close();
    }

    let table = state.detections().unwrap();
    assert!(!table.has_column(Column::Embeddings));
    assert!(table.rows()[0].embeddings.is_none());
    assert!(table.has_column(Column::BboxLtwh));
    assert!(!state.is_open());
}

#[test]
fn test_columns_produced_by_a_stage_are_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = empty_archive(dir.path());
    {
        let (mut state, _) = state_with(tracking_set(), archive_config(&path), &[]);
        let mut session = state.open().unwrap();
        let mut scope = session.select(1);
        scope.update(records(1, 10, 0.6));
        scope.save().unwrap();
    }

    let stages = vec![StageColumns::new(
        "pose",
        &[Column::BboxLtwh],
        &[Column::KeypointsXyc],
    )];
    let config = TrackStateConfig {
        load_file: Some(path.clone()),
        ..Default::default()
    };
    let (mut state, sink) = state_with(tracking_set(), config, &stages);
    assert!(!state.load_columns().contains(&Column::KeypointsXyc));
    assert!(state.load_columns().contains(&Column::BboxConf));
    assert!(matches!(
        sink.events().as_slice(),
        [Diagnostic::LoadingColumns { columns, .. }] if !columns.contains(&"keypoints_xyc".to_string())
    ));

    let mut session = state.open().unwrap();
    let mut scope = session.select(1);
    let loaded = scope.load().unwrap();
    assert!(!loaded.has_column(Column::KeypointsXyc));
    assert!(loaded.rows()[0].keypoints_xyc.is_none());
    assert_eq!(loaded.rows()[0].bbox_conf, Some(0.6));

    // The full archived rows are merged into the table.
    assert!(scope
        .detections()
        .unwrap()
        .has_column(Column::KeypointsXyc));
}

#[test]
fn test_missing_video_in_archive_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = empty_archive(dir.path());
    let config = TrackStateConfig {
        load_file: Some(path),
        ..Default::default()
    };
    let (mut state, sink) = state_with(tracking_set(), config, &[]);

    let mut session = state.open().unwrap();
    let mut scope = session.select(2);
    assert!(scope.load().unwrap().is_empty());
    assert!(scope.detections().is_none());
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, Diagnostic::VideoNotInArchive { video_id: 2, .. })));
    // No save file configured: saving is a no-op.
    assert_eq!(scope.save().unwrap(), None);
}

#[test]
fn test_groundtruth_is_projected_onto_load_columns() {
    let gt = Detections::from_rows(vec![Detection {
        category_id: Some(1),
        bbox_ltwh: Some([0.0, 0.0, 5.0, 5.0]),
        track_id: Some(3),
        ..Detection::new(0, 10, 1)
    }]);
    let stages = vec![StageColumns::new("track", &[Column::BboxLtwh], &[Column::TrackId])];
    let config = TrackStateConfig {
        load_from_groundtruth: true,
        ..Default::default()
    };
    let (mut state, sink) = state_with(tracking_set().with_groundtruth(gt), config, &stages);

    let mut session = state.open().unwrap();
    {
        let mut scope = session.select(1);
        let loaded = scope.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.rows()[0].bbox_ltwh, Some([0.0, 0.0, 5.0, 5.0]));
        assert!(!loaded.has_column(Column::TrackId));
        assert!(!loaded.has_column(Column::CategoryId));
    }

    let mut scope = session.select(2);
    assert!(scope.load().unwrap().is_empty());
    assert_eq!(
        sink.events(),
        vec![Diagnostic::VideoNotInGroundTruth { video_id: 2 }]
    );
}

#[test]
fn test_groundtruth_source_requires_groundtruth() {
    let config = TrackStateConfig {
        load_from_groundtruth: true,
        ..Default::default()
    };
    let result = TrackerState::new(
        tracking_set(),
        config,
        &Vec::<StageColumns>::new(),
        Rc::new(MemorySink::new()),
    );
    assert!(matches!(result, Err(TrackStateError::Config(_))));
}

#[test]
fn test_imported_annotations_take_priority() {
    let dir = tempfile::tempdir().unwrap();
    let json_dir = dir.path().join("annotations");
    fs::create_dir(&json_dir).unwrap();
    fs::write(
        json_dir.join("preds.json"),
        r#"{ "annotations": [ { "image_id": 20, "bbox": [10, 10, 50, 40], "track_id": 9 } ] }"#,
    )
    .unwrap();

    let config = TrackStateConfig {
        json_file: Some(json_dir),
        load_from_groundtruth: true,
        bbox_format: crate::config::BboxFormat::Ltrb,
        ..Default::default()
    };
    let gt = records(2, 20, 1.0);
    let (mut state, _) = state_with(tracking_set().with_groundtruth(gt), config, &[]);

    let mut session = state.open().unwrap();
    let mut scope = session.select(2);
    let loaded = scope.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.rows()[0].bbox_ltwh, Some([10.0, 10.0, 40.0, 30.0]));
    assert_eq!(loaded.rows()[0].track_id, Some(9));
    assert_eq!(
        loaded.rows()[0].track_bbox_kf_ltwh,
        Some([10.0, 10.0, 40.0, 30.0])
    );
}

#[test]
fn test_preconditions_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackStateConfig {
        save_file: Some(dir.path().join("states.tsa")),
        ..Default::default()
    };
    let (mut state, _) = state_with(tracking_set(), config, &[]);

    // No selected video.
    assert!(matches!(state.load(), Err(TrackStateError::Precondition(_))));
    assert!(matches!(state.save(), Err(TrackStateError::Precondition(_))));

    let mut session = state.open().unwrap();
    let scope = session.select(1);
    // Nothing accumulated yet.
    assert!(matches!(scope.save(), Err(TrackStateError::Precondition(_))));
}

#[test]
fn test_video_scope_clears_selection_on_drop() {
    let (mut state, _) = state_with(tracking_set(), TrackStateConfig::default(), &[]);
    let mut session = state.open().unwrap();
    {
        let scope = session.select(2);
        assert_eq!(scope.current_video(), Some(2));
    }
    assert_eq!(session.current_video(), None);
}

#[test]
fn test_video_loop_end_updates_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackStateConfig {
        save_file: Some(dir.path().join("states.tsa")),
        ..Default::default()
    };
    let (mut state, _) = state_with(tracking_set(), config, &[]);
    let video = state.tracking_set().video(1).cloned().unwrap();
    let other = state.tracking_set().video(2).cloned().unwrap();

    let mut session = state.open().unwrap();
    let mut scope = session.select(1);
    assert!(matches!(
        scope.on_video_loop_end(&other, 1, records(2, 20, 0.3)),
        Err(TrackStateError::Precondition(_))
    ));
    assert_eq!(
        scope
            .on_video_loop_end(&video, 0, records(1, 10, 0.3))
            .unwrap(),
        Some(PutOutcome::Written)
    );
    assert_eq!(scope.saved_videos(), vec![1]);
    assert_eq!(scope.detections().unwrap().len(), 1);
}

#[test]
fn test_missing_load_archive_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrackStateConfig {
        load_file: Some(dir.path().join("absent.tsa")),
        ..Default::default()
    };
    let result = TrackerState::new(
        tracking_set(),
        config,
        &Vec::<StageColumns>::new(),
        Rc::new(MemorySink::new()),
    );
    assert!(matches!(result, Err(TrackStateError::Config(_))));
}

#[test]
fn test_foreign_summary_does_not_block_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.tsa");
    {
        let mut archive = ArchiveFile::open_append(&path).unwrap();
        archive
            .write_entry(
                crate::archive::SUMMARY_ENTRY,
                br#"{"columns": ["id", "image_id", "video_id", "frame"]}"#,
                EntryCodec::Stored,
            )
            .unwrap();
        let bytes = crate::archive::arrow_impl::encode_ipc(&records(1, 10, 0.4)).unwrap();
        archive
            .write_entry("1.arrow", &bytes, EntryCodec::Stored)
            .unwrap();
    }
    let config = TrackStateConfig {
        load_file: Some(path),
        ..Default::default()
    };

    let (state, sink) = state_with(tracking_set(), config, &[]);
    assert!(state.load_columns().contains(&Column::KeypointsXyc));
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, Diagnostic::SummaryUnreadable { .. })));
}
