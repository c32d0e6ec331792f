use chrono::{Days, NaiveDate};
use flowspike_core::{
    AnomalyTagger, FeatureEngine, FlowRecord, Pipeline, PipelineConfig, RevealCursor,
    SeriesStore, TaggingPolicy, slices,
};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn series_records(entity_id: u32, flows: &[f64]) -> Vec<FlowRecord> {
    let start = date("2020-01-01");
    flows
        .iter()
        .enumerate()
        .map(|(i, &f)| FlowRecord::new(entity_id, start + Days::new(i as u64), f))
        .collect()
}

fn mixed_records() -> Vec<FlowRecord> {
    let mut records = series_records(0, &[12.0, 14.0, 11.0, 13.0, 800.0, 12.0, 15.0, 13.0, 12.0, 11.0]);
    records.extend(series_records(1, &[5.0; 10]));
    records.extend(series_records(
        2,
        &[9.0, 8.0, 10.0, 9.0, 300.0, 6000.0, 9.0, 8.0, 10.0, 9.0, 11.0, 9.0, 8.0],
    ));
    records.extend(series_records(3, &[10000.0, 10.0, 10.0, 10.0]));
    records
}

#[test]
fn test_duplicate_entity_days_sum() {
    let records = vec![
        FlowRecord::new(1, date("2020-01-01"), 5.0),
        FlowRecord::new(1, date("2020-01-01"), 3.0),
        FlowRecord::new(1, date("2020-01-02"), 2.0),
    ];
    let store = SeriesStore::build(&records).unwrap();
    assert_eq!(
        store.get(1).unwrap().points(),
        &[(date("2020-01-01"), 8.0), (date("2020-01-02"), 2.0)]
    );
}

#[test]
fn test_visible_is_prefix_monotonic_for_every_policy() {
    let policies = [
        TaggingPolicy::lenient(),
        TaggingPolicy::strict(),
        TaggingPolicy::trailing(),
        TaggingPolicy::lenient().per_slice(),
        TaggingPolicy::strict().per_slice(),
    ];

    for policy in policies {
        let config = PipelineConfig {
            policy,
            ..Default::default()
        };
        let pipeline = Pipeline::build(&mixed_records(), config).unwrap();
        let ids = pipeline.list_entities();
        let max_len = pipeline.series().max_len();

        for k in 0..max_len {
            let a = pipeline.visible(&ids, RevealCursor(k));
            let b = pipeline.visible(&ids, RevealCursor(k + 1));
            for (va, vb) in a.iter().zip(&b) {
                let pa = va.result.as_ref().unwrap();
                let pb = vb.result.as_ref().unwrap();
                assert!(pb.len() >= pa.len());
                assert_eq!(&pb[..pa.len()], &pa[..], "policy {:?}, cursor {}", policy, k);
            }
        }
    }
}

#[test]
fn test_visible_is_idempotent() {
    let pipeline = Pipeline::build(&mixed_records(), PipelineConfig::default()).unwrap();
    let ids = [2, 0, 3];
    let first = pipeline.visible(&ids, RevealCursor(6));
    let second = pipeline.visible(&ids, RevealCursor(6));
    assert_eq!(first, second);
}

#[test]
fn test_constant_series_never_flags() {
    let records = series_records(7, &[25.0; 10]);
    let store = SeriesStore::build(&records).unwrap();
    let rows = FeatureEngine::compute(store.get(7).unwrap());

    assert!(rows.iter().all(|r| r.scaled_magnitude == 0.0));
    for m in [0.0, 1.5, 2.25] {
        let lenient = TaggingPolicy::lenient().with_thresholds(m, 10.0).unwrap();
        assert!(AnomalyTagger::tag(&rows, &lenient).iter().all(|&t| !t));
    }

    assert!(TaggingPolicy::lenient().with_thresholds(-1.0, 0.5).is_err());
    let forced = TaggingPolicy {
        magnitude_threshold: Some(-1.0),
        ratio_threshold: 0.5,
        ..TaggingPolicy::lenient()
    };
    assert!(AnomalyTagger::tag(&rows, &forced).iter().all(|&t| !t));
}

#[test]
fn test_first_step_spike_boundary() {
    let records = series_records(3, &[10000.0, 10.0, 10.0, 10.0]);
    let store = SeriesStore::build(&records).unwrap();
    let rows = FeatureEngine::compute(store.get(3).unwrap());

    let lenient = TaggingPolicy::lenient().with_thresholds(1.5, 10.0).unwrap();
    let strict = TaggingPolicy::strict().with_thresholds(1.5, 10.0).unwrap();

    assert!(AnomalyTagger::tag(&rows, &lenient)[0]);
    assert!(!AnomalyTagger::tag(&rows, &strict)[0]);
}

#[test]
fn test_slice_containing_spike_is_flagged() {
    let records = series_records(5, &[10.0, 11.0, 10.0, 12.0, 11.0, 900.0, 10.0]);
    let store = SeriesStore::build(&records).unwrap();
    let rows = FeatureEngine::compute(store.get(5).unwrap());
    let policy = TaggingPolicy::lenient();

    let step_tags = AnomalyTagger::tag(&rows, &policy);
    assert_eq!(step_tags.iter().position(|&t| t), Some(5));
    assert_eq!(step_tags.iter().filter(|&&t| t).count(), 1);

    let s = slices(rows.len(), 3);
    assert_eq!(s[0].indices().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(s[1].indices().collect::<Vec<_>>(), vec![3, 4, 5, 6]);
    assert_eq!(AnomalyTagger::tag_slices(&rows, &s, &policy), vec![false, true]);
}

#[test]
fn test_unknown_entity_does_not_fail_batch() {
    let pipeline = Pipeline::build(&mixed_records(), PipelineConfig::default()).unwrap();
    let views = pipeline.visible(&[0, 404, 1], RevealCursor(3));

    assert!(views[0].is_ok());
    assert!(!views[1].is_ok());
    assert!(views[2].is_ok());
}

#[test]
fn test_max_cursor_uses_longest_series() {
    let pipeline = Pipeline::build(&mixed_records(), PipelineConfig::default()).unwrap();
    // longest series has 13 points
    assert_eq!(pipeline.max_cursor(), 5);
}

#[test]
fn test_cursor_beyond_series_clamps_per_entity() {
    let pipeline = Pipeline::build(&mixed_records(), PipelineConfig::default()).unwrap();
    let views = pipeline.visible(&[2, 3], RevealCursor(15));
    assert_eq!(views[0].result.as_ref().unwrap().len(), 13);
    assert_eq!(views[1].result.as_ref().unwrap().len(), 4);
}

#[test]
fn test_pipeline_from_csv() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        file.path(),
        "entity_id,date,flow_count\n0,2020-01-01,5\n0,2020-01-01,3\n0,2020-01-02,2\n1,2020-01-01,7\n",
    )
    .unwrap();

    let pipeline = Pipeline::from_csv(file.path(), PipelineConfig::default()).unwrap();
    assert_eq!(pipeline.list_entities(), vec![0, 1]);
    assert_eq!(pipeline.series().get(0).unwrap().points()[0].1, 8.0);
}
