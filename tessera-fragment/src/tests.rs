use std::sync::Arc;

use rstest::rstest;
use rustc_hash::FxHashMap;
use tempfile::TempDir;
use tessera_dtype::{CellValNum, Datatype};
use tessera_error::TesseraError;

use crate::io::EncryptionKey;
use crate::{
    fragment_name, ArrayDirectory, ArraySchema, Attribute, Config, Dimension, Domain,
    FragmentInfo, FragmentMetadata, Layout, MemoryTracker, MemoryType, Range, Resources,
    SchemaMap, TimestampedUri, Uri,
};

fn resources() -> Arc<Resources> {
    Arc::new(Resources::new(Config::default()))
}

fn key() -> EncryptionKey {
    EncryptionKey::no_encryption()
}

fn schema_map(schema: &Arc<ArraySchema>) -> SchemaMap {
    let mut map = SchemaMap::default();
    map.insert(schema.name().to_string(), schema.clone());
    // Fragments older than v10 reference the unnamed legacy schema.
    map.insert(crate::LEGACY_SCHEMA_NAME.to_string(), schema.clone());
    map
}

fn dense_1d_schema(version: u32) -> Arc<ArraySchema> {
    let domain = Arc::new(
        Domain::new(
            vec![Dimension::new("d", 0i32, 9i32, Some(2i32)).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap(),
    );
    Arc::new(
        ArraySchema::new(
            "schema-dense-1d",
            true,
            domain,
            vec![Attribute::new("a", Datatype::Int32)],
        )
        .unwrap()
        .with_write_version(version),
    )
}

fn sparse_2d_schema() -> Arc<ArraySchema> {
    let domain = Arc::new(
        Domain::new(
            vec![
                Dimension::new("x", 0i64, 99i64, None).unwrap(),
                Dimension::new("y", 0i64, 99i64, None).unwrap(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap(),
    );
    Arc::new(
        ArraySchema::new(
            "schema-sparse-2d",
            false,
            domain,
            vec![Attribute::new("a", Datatype::Int64)],
        )
        .unwrap()
        .with_capacity(2)
        .unwrap(),
    )
}

fn mbr_2d(x: (i64, i64), y: (i64, i64)) -> Vec<Range> {
    vec![Range::fixed(x.0, x.1), Range::fixed(y.0, y.1)]
}

/// Scenario A: a dense 1-D int32 fragment with ten cells written across
/// five tiles of two cells each.
fn write_dense_1d(
    resources: &Arc<Resources>,
    tracker: &Arc<MemoryTracker>,
    schema: &Arc<ArraySchema>,
    uri: Uri,
) -> FragmentMetadata {
    let mut meta = FragmentMetadata::new(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (1, 1),
        true,
        false,
        false,
    );
    meta.init(vec![Range::fixed(0i32, 9i32)]).unwrap();
    meta.set_num_tiles(5).unwrap();
    for t in 0..5u64 {
        meta.set_tile_offset("a", t, 8);
        let min = 2 * t as i32;
        let max = min + 1;
        let sum = (min + max) as i64;
        meta.set_tile_min("a", t, &min.to_le_bytes());
        meta.set_tile_max("a", t, &max.to_le_bytes());
        meta.set_tile_sum("a", t, &sum.to_le_bytes());
    }
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    meta
}

#[test]
fn scenario_a_dense_1d() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = dense_1d_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "aaaa0001", 16)));
    let meta = write_dense_1d(&resources, &tracker, &schema, uri);

    assert_eq!(meta.tile_num(), 5);
    assert_eq!(schema.domain().cell_num_per_tile(), 2);
    assert_eq!(meta.cell_num(), 10);
    assert_eq!(meta.file_size("a").unwrap(), 40);
    for t in 0..5u64 {
        assert_eq!(meta.file_offset("a", t).unwrap(), t * 8);
        assert_eq!(meta.get_tile_min_as::<i32>("a", t).unwrap(), 2 * t as i32);
        assert_eq!(
            meta.get_tile_max_as::<i32>("a", t).unwrap(),
            2 * t as i32 + 1
        );
        let sum = i64::from_le_bytes(meta.get_tile_sum("a", t).unwrap());
        assert_eq!(sum, 4 * t as i64 + 1);
        assert_eq!(meta.persisted_tile_size("a", t).unwrap(), 8);
    }

    // Fragment roll-up.
    assert_eq!(meta.get_min("a").unwrap(), 0i32.to_le_bytes());
    assert_eq!(meta.get_max("a").unwrap(), 9i32.to_le_bytes());
    assert_eq!(i64::from_le_bytes(meta.get_sum("a").unwrap()), 45);

    // The dense enumerator over subarray [3, 6] covers tiles 1..=3.
    let tids = meta
        .compute_overlapping_tile_ids(&vec![Range::fixed(3i32, 6i32)])
        .unwrap();
    assert_eq!(tids, vec![1, 2, 3]);

    // And the full domain covers every tile.
    let tids = meta
        .compute_overlapping_tile_ids(&vec![Range::fixed(0i32, 9i32)])
        .unwrap();
    assert_eq!(tids, vec![0, 1, 2, 3, 4]);
}

#[test]
fn scenario_a_round_trip() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = dense_1d_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "aaaa0002", 16)));
    let mut meta = write_dense_1d(&resources, &tracker, &schema, uri.clone());
    meta.store(&key()).unwrap();

    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (1, 1),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();

    assert_eq!(read.format_version(), 16);
    assert!(read.dense());
    assert_eq!(read.non_empty_domain(), vec![Range::fixed(0i32, 9i32)]);
    assert_eq!(read.tile_num(), 5);
    assert_eq!(read.cell_num(), 10);
    assert_eq!(read.generic_tile_offsets(), meta.generic_tile_offsets());

    // Offsets are demand-loaded; accessors refuse beforehand.
    assert!(matches!(
        read.file_offset("a", 0),
        Err(TesseraError::NotLoaded(_))
    ));
    read.load_tile_offsets(&key(), vec!["a".to_string()]).unwrap();
    assert_eq!(read.file_size("a").unwrap(), 40);
    for t in 0..5u64 {
        assert_eq!(read.file_offset("a", t).unwrap(), t * 8);
    }

    read.load_tile_min_values(&key(), vec!["a".to_string()])
        .unwrap();
    read.load_tile_max_values(&key(), vec!["a".to_string()])
        .unwrap();
    read.load_tile_sum_values(&key(), vec!["a".to_string()])
        .unwrap();
    assert_eq!(read.get_tile_min_as::<i32>("a", 2).unwrap(), 4);
    assert_eq!(read.get_tile_max_as::<i32>("a", 2).unwrap(), 5);
    assert_eq!(i64::from_le_bytes(read.get_tile_sum("a", 4).unwrap()), 17);

    read.load_fragment_min_max_sum_null_count(&key()).unwrap();
    assert_eq!(read.get_min("a").unwrap(), 0i32.to_le_bytes());
    assert_eq!(read.get_max("a").unwrap(), 9i32.to_le_bytes());
    assert_eq!(i64::from_le_bytes(read.get_sum("a").unwrap()), 45);
}

/// Scenario B: a sparse 2-D int64 fragment, capacity 2, with coordinates
/// (1,1), (2,2), (10,10), (11,11) in write order.
fn write_sparse_2d(
    resources: &Arc<Resources>,
    tracker: &Arc<MemoryTracker>,
    schema: &Arc<ArraySchema>,
    uri: Uri,
    timestamp_range: (u64, u64),
) -> FragmentMetadata {
    let mut meta = FragmentMetadata::new(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        timestamp_range,
        false,
        false,
        false,
    );
    meta.init(vec![Range::empty(), Range::empty()]).unwrap();
    meta.set_num_tiles(2).unwrap();
    meta.set_mbr(0, mbr_2d((1, 2), (1, 2))).unwrap();
    meta.set_mbr(1, mbr_2d((10, 11), (10, 11))).unwrap();
    meta.set_last_tile_cell_num(2);
    for t in 0..2u64 {
        meta.set_tile_offset("a", t, 16);
        let (min, max) = if t == 0 { (1i64, 2i64) } else { (10, 11) };
        meta.set_tile_min("a", t, &min.to_le_bytes());
        meta.set_tile_max("a", t, &max.to_le_bytes());
        meta.set_tile_sum("a", t, &(min + max).to_le_bytes());
    }
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    meta
}

#[test]
fn scenario_b_sparse_2d() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "bbbb0001", 16)));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri, (1, 1));

    assert_eq!(meta.tile_num(), 2);
    assert_eq!(meta.last_tile_cell_num(), 2);
    assert_eq!(meta.cell_num(), 4);
    assert_eq!(meta.mbr(0).unwrap(), mbr_2d((1, 2), (1, 2)));
    assert_eq!(meta.mbr(1).unwrap(), mbr_2d((10, 11), (10, 11)));
    assert_eq!(meta.non_empty_domain(), mbr_2d((1, 11), (1, 11)));

    // The store path builds the internal R-tree levels.
    meta.store(&key()).unwrap();

    // Tile 0 is entirely inside [(0,5),(0,5)]: a whole-tile hit with full
    // coverage; tile 1 is excluded.
    let overlap = meta
        .get_tile_overlap(&mbr_2d((0, 5), (0, 5)), &[false, false])
        .unwrap();
    assert_eq!(overlap.tile_ranges, vec![(0, 0)]);
    assert!(overlap.tiles.is_empty());

    // A subarray cutting both tiles reports per-tile coverage.
    let overlap = meta
        .get_tile_overlap(&mbr_2d((2, 10), (2, 10)), &[false, false])
        .unwrap();
    assert!(overlap.tile_ranges.is_empty());
    assert_eq!(overlap.tiles.len(), 2);
    assert_eq!((overlap.tiles[0].0, overlap.tiles[1].0), (0, 1));

    // Unconstrained dimensions cover everything as one range.
    let overlap = meta
        .get_tile_overlap(&vec![Range::empty(), Range::empty()], &[true, true])
        .unwrap();
    assert_eq!(overlap.tile_ranges, vec![(0, 1)]);
    assert!(overlap.tiles.is_empty());
}

#[test]
fn scenario_b_rtree_round_trip() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(2, 2, "bbbb0002", 16)));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri.clone(), (2, 2));
    meta.store(&key()).unwrap();

    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (2, 2),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();
    assert_eq!(read.tile_num(), 2);
    assert_eq!(read.last_tile_cell_num(), 2);

    assert!(matches!(read.mbr(0), Err(TesseraError::NotLoaded(_))));
    read.load_rtree(&key()).unwrap();
    assert_eq!(read.mbr(0).unwrap(), mbr_2d((1, 2), (1, 2)));
    assert_eq!(read.mbr(1).unwrap(), mbr_2d((10, 11), (10, 11)));

    let overlap = read
        .get_tile_overlap(&mbr_2d((0, 5), (0, 5)), &[false, false])
        .unwrap();
    assert_eq!(overlap.tile_num(), 1);
}

/// Scenario C: per-tile and per-fragment min/max over a var-sized string
/// attribute.
#[test]
fn scenario_c_var_string_min_max() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let domain = Arc::new(
        Domain::new(
            vec![Dimension::new("d", 0i32, 3i32, Some(4i32)).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap(),
    );
    let schema = Arc::new(
        ArraySchema::new(
            "schema-var",
            true,
            domain,
            vec![Attribute::new("s", Datatype::StringAscii).with_cell_val_num(CellValNum::Var)],
        )
        .unwrap(),
    );
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "cccc0001", 16)));
    let mut meta = FragmentMetadata::new(
        resources,
        tracker,
        schema,
        uri,
        (1, 1),
        true,
        false,
        false,
    );
    meta.init(vec![Range::fixed(0i32, 3i32)]).unwrap();
    meta.set_num_tiles(1).unwrap();

    // Cells "bob", "alice", "carol", "dan" in one tile.
    meta.set_tile_offset("s", 0, 5 * 8);
    meta.set_tile_var_offset("s", 0, 16);
    meta.set_tile_var_size("s", 0, 16);
    meta.set_tile_min_var_size("s", 0, 5);
    meta.set_tile_max_var_size("s", 0, 3);
    meta.convert_tile_min_max_var_sizes_to_offsets("s");
    meta.set_tile_min_var("s", 0, b"alice");
    meta.set_tile_max_var("s", 0, b"dan");
    meta.compute_fragment_min_max_sum_null_count().unwrap();

    assert_eq!(&*meta.get_tile_min_var("s", 0).unwrap(), b"alice");
    assert_eq!(&*meta.get_tile_max_var("s", 0).unwrap(), b"dan");
    assert_eq!(meta.get_min("s").unwrap(), b"alice");
    assert_eq!(meta.get_max("s").unwrap(), b"dan");

    // Sums are not maintained for strings.
    assert!(matches!(
        meta.get_sum("s"),
        Err(TesseraError::NotApplicable(_))
    ));
}

/// Scenario D: fragment sums saturate instead of wrapping.
#[test]
fn scenario_d_sum_saturation() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let domain = Arc::new(
        Domain::new(
            vec![Dimension::new("d", 0i32, 3i32, Some(2i32)).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap(),
    );
    let schema = Arc::new(
        ArraySchema::new(
            "schema-sum",
            true,
            domain,
            vec![Attribute::new("a", Datatype::Int64)],
        )
        .unwrap(),
    );
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "dddd0001", 16)));
    let mut meta = FragmentMetadata::new(
        resources,
        tracker,
        schema,
        uri,
        (1, 1),
        true,
        false,
        false,
    );
    meta.init(vec![Range::fixed(0i32, 3i32)]).unwrap();
    meta.set_num_tiles(2).unwrap();
    meta.set_tile_min("a", 0, &0i64.to_le_bytes());
    meta.set_tile_max("a", 0, &0i64.to_le_bytes());
    meta.set_tile_min("a", 1, &0i64.to_le_bytes());
    meta.set_tile_max("a", 1, &0i64.to_le_bytes());
    meta.set_tile_sum("a", 0, &(i64::MAX - 3).to_le_bytes());
    meta.set_tile_sum("a", 1, &10i64.to_le_bytes());
    meta.compute_fragment_min_max_sum_null_count().unwrap();

    assert_eq!(i64::from_le_bytes(meta.get_sum("a").unwrap()), i64::MAX);
}

fn full_sparse_schema(version: u32) -> Arc<ArraySchema> {
    let domain = Arc::new(
        Domain::new(
            vec![
                Dimension::new("x", 0i64, 99i64, None).unwrap(),
                Dimension::new("y", 0i64, 99i64, None).unwrap(),
            ],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap(),
    );
    Arc::new(
        ArraySchema::new(
            "schema-versioned",
            false,
            domain,
            vec![
                Attribute::new("a", Datatype::Int64),
                Attribute::new("s", Datatype::StringAscii).with_cell_val_num(CellValNum::Var),
                Attribute::new("n", Datatype::Float64).nullable(),
            ],
        )
        .unwrap()
        .with_capacity(2)
        .unwrap()
        .with_write_version(version),
    )
}

fn write_versioned_fragment(
    resources: &Arc<Resources>,
    tracker: &Arc<MemoryTracker>,
    schema: &Arc<ArraySchema>,
    uri: Uri,
) -> FragmentMetadata {
    let mut meta = FragmentMetadata::new(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (3, 4),
        false,
        false,
        false,
    );
    meta.init(vec![Range::empty(), Range::empty()]).unwrap();
    meta.set_num_tiles(2).unwrap();
    meta.set_mbr(0, mbr_2d((0, 9), (0, 9))).unwrap();
    meta.set_mbr(1, mbr_2d((50, 59), (50, 59))).unwrap();
    meta.set_last_tile_cell_num(1);
    for t in 0..2u64 {
        meta.set_tile_offset("a", t, 16);
        meta.set_tile_min("a", t, &(t as i64 * 50).to_le_bytes());
        meta.set_tile_max("a", t, &(t as i64 * 50 + 9).to_le_bytes());
        meta.set_tile_sum("a", t, &(t as i64 * 100).to_le_bytes());

        meta.set_tile_offset("s", t, 24);
        meta.set_tile_var_offset("s", t, 12);
        meta.set_tile_var_size("s", t, 12);

        meta.set_tile_offset("n", t, 16);
        meta.set_tile_validity_offset("n", t, 2);
        meta.set_tile_min("n", t, &1.5f64.to_le_bytes());
        meta.set_tile_max("n", t, &2.5f64.to_le_bytes());
        meta.set_tile_sum("n", t, &4.0f64.to_le_bytes());
        meta.set_tile_null_count("n", t, t);
    }
    meta.set_tile_min_var_size("s", 0, 2);
    meta.set_tile_max_var_size("s", 0, 2);
    meta.set_tile_min_var_size("s", 1, 3);
    meta.set_tile_max_var_size("s", 1, 3);
    meta.convert_tile_min_max_var_sizes_to_offsets("s");
    meta.set_tile_min_var("s", 0, b"aa");
    meta.set_tile_max_var("s", 0, b"zz");
    meta.set_tile_min_var("s", 1, b"bbb");
    meta.set_tile_max_var("s", 1, b"yyy");
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    if schema.write_version() >= 15 {
        meta.set_processed_conditions(vec!["cond-1".to_string(), "cond-2".to_string()]);
    }
    meta
}

/// Scenario E: every supported write version round-trips through its own
/// store layout.
#[rstest]
#[case(7)]
#[case(8)]
#[case(10)]
#[case(11)]
#[case(14)]
#[case(15)]
#[case(16)]
fn scenario_e_versioned_round_trip(#[case] version: u32) {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = full_sparse_schema(version);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(3, 4, "eeee0001", version)));
    let mut meta = write_versioned_fragment(&resources, &tracker, &schema, uri.clone());
    meta.store(&key()).unwrap();

    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (3, 4),
        version,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();

    assert_eq!(read.format_version(), version);
    assert!(!read.dense());
    assert_eq!(read.non_empty_domain(), mbr_2d((0, 59), (0, 59)));
    assert_eq!(read.tile_num(), 2);
    assert_eq!(read.last_tile_cell_num(), 1);
    assert_eq!(read.cell_num(), 3);
    let mut expected_gt = meta.generic_tile_offsets().clone();
    if version == 15 {
        // v15 stores the processed-conditions tile but its footer predates
        // the field indexing it.
        expected_gt.processed_conditions = 0;
    }
    assert_eq!(read.generic_tile_offsets(), &expected_gt);

    read.load_rtree(&key()).unwrap();
    assert_eq!(read.mbrs().unwrap(), meta.mbrs().unwrap());

    let all = vec!["a".to_string(), "s".to_string(), "n".to_string()];
    read.load_tile_offsets(&key(), all.clone()).unwrap();
    for t in 0..2u64 {
        assert_eq!(
            read.file_offset("a", t).unwrap(),
            meta.file_offset("a", t).unwrap()
        );
        assert_eq!(
            read.file_var_offset("s", t).unwrap(),
            meta.file_var_offset("s", t).unwrap()
        );
        assert_eq!(
            read.file_validity_offset("n", t).unwrap(),
            meta.file_validity_offset("n", t).unwrap()
        );
    }
    assert_eq!(read.file_size("a").unwrap(), 32);
    assert_eq!(read.file_var_size("s").unwrap(), 24);
    assert_eq!(read.file_validity_size("n").unwrap(), 4);

    read.load_tile_var_sizes(&key(), "s").unwrap();
    assert_eq!(read.tile_var_size("s", 1).unwrap(), 12);

    if version >= 11 {
        read.load_tile_min_values(&key(), all.clone()).unwrap();
        read.load_tile_max_values(&key(), all.clone()).unwrap();
        read.load_tile_sum_values(&key(), all.clone()).unwrap();
        read.load_tile_null_count_values(&key(), all.clone()).unwrap();
        assert_eq!(read.get_tile_min_as::<i64>("a", 1).unwrap(), 50);
        assert_eq!(read.get_tile_max_as::<i64>("a", 1).unwrap(), 59);
        assert_eq!(&*read.get_tile_min_var("s", 1).unwrap(), b"bbb");
        assert_eq!(&*read.get_tile_max_var("s", 0).unwrap(), b"zz");
        assert_eq!(read.get_tile_null_count("n", 1).unwrap(), 1);
    }

    if version >= 12 {
        read.load_fragment_min_max_sum_null_count(&key()).unwrap();
        assert_eq!(read.get_min("a").unwrap(), meta.get_min("a").unwrap());
        assert_eq!(read.get_max("a").unwrap(), meta.get_max("a").unwrap());
        assert_eq!(read.get_sum("a").unwrap(), meta.get_sum("a").unwrap());
        assert_eq!(read.get_min("s").unwrap(), b"aa");
        assert_eq!(read.get_max("s").unwrap(), b"zz");
        assert_eq!(read.get_null_count("n").unwrap(), 1);
    }

    if version >= 16 {
        read.load_processed_conditions(&key()).unwrap();
        assert_eq!(
            read.get_processed_conditions().unwrap(),
            vec!["cond-1".to_string(), "cond-2".to_string()]
        );
        assert!(read.has_processed_condition("cond-2"));
    }
}

#[test]
fn store_below_version_floor_is_refused() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = full_sparse_schema(6);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(3, 4, "eeee0002", 6)));
    let mut meta = write_versioned_fragment(&resources, &tracker, &schema, uri);
    assert!(matches!(
        meta.store(&key()),
        Err(TesseraError::Unsupported(_))
    ));
}

#[test]
fn truncated_footer_size_is_diagnosed() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = full_sparse_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(3, 4, "eeee0003", 16)));
    let mut meta = write_versioned_fragment(&resources, &tracker, &schema, uri.clone());
    meta.store(&key()).unwrap();

    // Strip the trailing footer_size word.
    let meta_path = uri.as_path().join(crate::FRAGMENT_METADATA_FILENAME);
    let bytes = std::fs::read(&meta_path).unwrap();
    std::fs::write(&meta_path, &bytes[..bytes.len() - 8]).unwrap();

    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (3, 4),
        16,
    );
    let err = read.load(&key(), None, &schema_map(&schema)).unwrap_err();
    assert!(matches!(
        err,
        TesseraError::Corrupt(_) | TesseraError::Invalid(_)
    ));
}

/// Scenario F: a denied R-tree reservation leaves the section unloaded and
/// chargeable again under a bigger budget.
#[test]
fn scenario_f_oom_rollback() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "ffff0001", 16)));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri.clone(), (1, 1));
    meta.store(&key()).unwrap();

    let read_tracker = Arc::new(MemoryTracker::unbounded());
    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        read_tracker.clone(),
        schema.clone(),
        uri,
        (1, 1),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();

    // Choke the budget below the R-tree size.
    let footer_usage = read_tracker.memory_usage();
    read_tracker.set_budget(footer_usage + 10);
    let err = read.load_rtree(&key()).unwrap_err();
    let TesseraError::OutOfMemory {
        requested,
        available,
        ..
    } = err
    else {
        panic!("expected OutOfMemory, got {err}");
    };
    assert!(requested > available);
    assert!(matches!(read.mbr(0), Err(TesseraError::NotLoaded(_))));
    assert_eq!(read_tracker.memory_usage(), footer_usage);

    // A second load under an enlarged budget succeeds.
    read_tracker.set_budget(u64::MAX);
    read.load_rtree(&key()).unwrap();
    assert_eq!(read.mbr(1).unwrap(), mbr_2d((10, 11), (10, 11)));
}

#[test]
fn free_tile_offsets_releases_each_vector_once() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = full_sparse_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(3, 4, "eeee0004", 16)));
    let mut meta = write_versioned_fragment(&resources, &tracker, &schema, uri.clone());
    meta.store(&key()).unwrap();

    let read_tracker = Arc::new(MemoryTracker::unbounded());
    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        read_tracker.clone(),
        schema.clone(),
        uri,
        (3, 4),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();
    let baseline = read_tracker.memory_usage();

    let all = vec!["a".to_string(), "s".to_string(), "n".to_string()];
    read.load_tile_offsets(&key(), all).unwrap();
    read.load_tile_var_sizes(&key(), "s").unwrap();
    assert!(read_tracker.memory_usage() > baseline);

    read.free_tile_offsets();
    assert_eq!(read_tracker.memory_usage(), baseline);
    assert_eq!(read_tracker.memory_usage_for(MemoryType::TileOffsets), 0);
    assert!(matches!(
        read.file_offset("a", 0),
        Err(TesseraError::NotLoaded(_))
    ));

    // Freeing again must not underflow or double-release.
    read.free_tile_offsets();
    assert_eq!(read_tracker.memory_usage(), baseline);
}

#[test]
fn free_rtree_releases_memory() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "ffff0002", 16)));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri.clone(), (1, 1));
    meta.store(&key()).unwrap();

    let read_tracker = Arc::new(MemoryTracker::unbounded());
    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        read_tracker.clone(),
        schema.clone(),
        uri,
        (1, 1),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();
    read.load_rtree(&key()).unwrap();
    assert!(read_tracker.memory_usage_for(MemoryType::RTree) > 0);

    read.free_rtree();
    assert!(matches!(read.mbr(0), Err(TesseraError::NotLoaded(_))));
    // A freed R-tree can be loaded again.
    read.load_rtree(&key()).unwrap();
    assert_eq!(read.mbr(0).unwrap(), mbr_2d((1, 2), (1, 2)));
}

#[test]
fn column_file_names_by_version() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());

    for (version, expect_a, expect_s) in [
        (7u32, "a", "s"),
        (8, "a", "s"),
        (16, "a0", "a1"),
    ] {
        let schema = full_sparse_schema(version);
        let meta = FragmentMetadata::new(
            resources.clone(),
            tracker.clone(),
            schema,
            Uri::new("/arrays/x/frag"),
            (1, 1),
            false,
            false,
            false,
        );
        assert_eq!(meta.encode_name("a").unwrap(), expect_a);
        assert_eq!(meta.encode_name("s").unwrap(), expect_s);
        if version >= 9 {
            assert_eq!(meta.encode_name("x").unwrap(), "d0");
            assert_eq!(meta.encode_name("y").unwrap(), "d1");
            assert_eq!(meta.encode_name("__coords").unwrap(), "__coords");
        }
    }

    // Version 8 percent-encodes hostile characters.
    let domain = Arc::new(
        Domain::new(
            vec![Dimension::new("x", 0i64, 9i64, None).unwrap()],
            Layout::RowMajor,
            Layout::RowMajor,
        )
        .unwrap(),
    );
    let schema = Arc::new(
        ArraySchema::new(
            "schema-odd-names",
            false,
            domain,
            vec![Attribute::new("a#b/c", Datatype::Int32)],
        )
        .unwrap()
        .with_write_version(8),
    );
    let meta = FragmentMetadata::new(
        resources,
        tracker,
        schema,
        Uri::new("/arrays/x/frag"),
        (1, 1),
        false,
        false,
        false,
    );
    assert_eq!(meta.encode_name("a#b/c").unwrap(), "a%23b%2Fc");
    assert!(meta
        .uri("a#b/c")
        .unwrap()
        .to_string()
        .ends_with("a%23b%2Fc.tdb"));
}

#[test]
fn timestamps_and_delete_meta_columns_round_trip() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = full_sparse_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(9, 9, "tttt0001", 16)));
    let mut meta = FragmentMetadata::new(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri.clone(),
        (9, 9),
        false,
        true,
        true,
    );
    // 3 attributes + coords + 2 dims + timestamps + 2 delete columns.
    assert_eq!(meta.num_dims_and_attrs(), 9);
    meta.init(vec![Range::empty(), Range::empty()]).unwrap();
    meta.set_num_tiles(1).unwrap();
    meta.set_mbr(0, mbr_2d((5, 6), (5, 6))).unwrap();
    meta.set_last_tile_cell_num(2);
    meta.set_tile_offset("a", 0, 16);
    meta.set_tile_offset("__timestamps", 0, 16);
    meta.set_tile_offset("__delete_timestamps", 0, 16);
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    meta.store(&key()).unwrap();

    let mut read = FragmentMetadata::for_reading(
        resources,
        tracker,
        schema.clone(),
        uri,
        (9, 9),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();
    assert!(read.has_timestamps());
    assert!(read.has_delete_meta());
    assert_eq!(read.num_dims_and_attrs(), 9);
    read.load_tile_offsets(&key(), vec!["__timestamps".to_string()])
        .unwrap();
    assert_eq!(read.file_size("__timestamps").unwrap(), 16);
    assert_eq!(read.encode_name("__timestamps").unwrap(), "t");
    assert_eq!(read.encode_name("__delete_timestamps").unwrap(), "dt");
    assert_eq!(
        read.encode_name("__delete_condition_index").unwrap(),
        "dci"
    );
}

#[test]
fn add_max_buffer_sizes_dense_and_sparse() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());

    // Dense: subarray [3, 6] touches tiles 1..=3, 2 cells of 4 bytes each.
    let schema = dense_1d_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "mmmm0001", 16)));
    let meta = write_dense_1d(&resources, &tracker, &schema, uri);
    let mut sizes = FxHashMap::default();
    sizes.insert("a".to_string(), (0u64, 0u64));
    meta.add_max_buffer_sizes(&key(), &vec![Range::fixed(3i32, 6i32)], &mut sizes)
        .unwrap();
    assert_eq!(sizes["a"], (3 * 2 * 4, 0));

    // Sparse: subarray covering both tiles, capacity 2 and a full last
    // tile.
    let schema = sparse_2d_schema();
    let uri = Uri::new(dir.path().join(fragment_name(1, 1, "mmmm0002", 16)));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri, (1, 1));
    meta.store(&key()).unwrap();
    let mut sizes = FxHashMap::default();
    sizes.insert("a".to_string(), (0u64, 0u64));
    meta.add_max_buffer_sizes(&key(), &mbr_2d((0, 99), (0, 99)), &mut sizes)
        .unwrap();
    assert_eq!(sizes["a"], (4 * 8, 0));
}

#[test]
fn concurrent_writers_and_readers() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = full_sparse_schema(16);
    let dir = TempDir::new().unwrap();
    let uri = Uri::new(dir.path().join(fragment_name(5, 5, "cccc0099", 16)));
    let mut meta = FragmentMetadata::new(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri.clone(),
        (5, 5),
        false,
        false,
        false,
    );
    meta.init(vec![Range::empty(), Range::empty()]).unwrap();
    let tiles = 64u64;
    meta.set_num_tiles(tiles).unwrap();

    // Distinct tiles and columns written from many threads.
    std::thread::scope(|scope| {
        let meta = &meta;
        for chunk in 0..4u64 {
            scope.spawn(move || {
                for t in (chunk * tiles / 4)..((chunk + 1) * tiles / 4) {
                    let v = t as i64;
                    meta.set_mbr(t, mbr_2d((v, v), (v, v))).unwrap();
                    meta.set_tile_offset("a", t, 16);
                    meta.set_tile_min("a", t, &v.to_le_bytes());
                    meta.set_tile_max("a", t, &v.to_le_bytes());
                    meta.set_tile_sum("a", t, &v.to_le_bytes());
                }
            });
        }
    });
    meta.set_last_tile_cell_num(2);
    meta.compute_fragment_min_max_sum_null_count().unwrap();
    assert_eq!(meta.non_empty_domain(), mbr_2d((0, 63), (0, 63)));
    meta.store(&key()).unwrap();

    // Concurrent double-checked loads on the read side.
    let mut read = FragmentMetadata::for_reading(
        resources.clone(),
        tracker.clone(),
        schema.clone(),
        uri,
        (5, 5),
        16,
    );
    read.load(&key(), None, &schema_map(&schema)).unwrap();
    let read = Arc::new(read);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let read = read.clone();
            scope.spawn(move || {
                read.load_rtree(&key()).unwrap();
                read.load_tile_offsets(&key(), vec!["a".to_string()]).unwrap();
                assert_eq!(read.file_offset("a", 63).unwrap(), 63 * 16);
            });
        }
    });
    // The offsets vector was charged exactly once despite four loaders.
    let offsets_bytes = 64 * 8;
    assert!(tracker.memory_usage_for(MemoryType::TileOffsets) >= offsets_bytes);
    assert!(tracker.memory_usage_for(MemoryType::TileOffsets) < 4 * offsets_bytes);
}

#[test]
fn fragment_info_window_and_anterior() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let array_uri = Uri::new(dir.path());

    let mut fragments = Vec::new();
    for (t, uuid) in [(1u64, "f0001"), (3, "f0002"), (5, "f0003")] {
        let name = fragment_name(t, t, uuid, 16);
        let uri = Uri::new(dir.path().join(&name));
        let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri.clone(), (t, t));
        meta.store(&key()).unwrap();
        fragments.push(TimestampedUri {
            uri,
            timestamp_range: (t, t),
            version: 16,
        });
    }

    let array_dir = ArrayDirectory::open(
        &resources,
        array_uri.clone(),
        schema.clone(),
        schema_map(&schema),
    )
    .unwrap();
    assert_eq!(array_dir.fragment_uris().len(), 3);

    let mut info = FragmentInfo::new(array_uri, resources.clone(), tracker.clone());
    info.load(&array_dir, 2, 10).unwrap();

    // Fragments at t=3 and t=5 are in the window; t=1 is anterior.
    assert_eq!(info.fragment_num(), 2);
    assert_eq!(info.get_timestamp_range(0).unwrap(), (3, 3));
    assert_eq!(info.get_timestamp_range(1).unwrap(), (5, 5));
    assert_eq!(info.anterior_ndrange(), &mbr_2d((1, 11), (1, 11)));
    assert_eq!(info.get_total_cell_num().unwrap(), 8);
    assert_eq!(info.get_version(1).unwrap(), 16);
    assert_eq!(info.unconsolidated_metadata_num(), 2);

    // MBRs load on demand through the info layer.
    assert_eq!(info.get_mbr_num(0).unwrap(), 2);
    assert_eq!(info.get_mbr(0, 1).unwrap(), mbr_2d((10, 11), (10, 11)));

    let mut out = Vec::new();
    info.dump(&mut out).unwrap();
    let report = String::from_utf8(out).unwrap();
    assert!(report.contains("Fragment num: 2"));
}

#[test]
fn fragment_info_load_and_replace() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let array_uri = Uri::new(dir.path());

    let mut fragments = Vec::new();
    for (t, uuid) in [(1u64, "g0001"), (2, "g0002"), (3, "g0003")] {
        let name = fragment_name(t, t, uuid, 16);
        let uri = Uri::new(dir.path().join(&name));
        let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri.clone(), (t, t));
        meta.store(&key()).unwrap();
        fragments.push(TimestampedUri {
            uri,
            timestamp_range: (t, t),
            version: 16,
        });
    }

    let array_dir = ArrayDirectory::new(
        array_uri.clone(),
        fragments.clone(),
        Vec::new(),
        schema.clone(),
        schema_map(&schema),
    );
    let mut info = FragmentInfo::new(array_uri, resources.clone(), tracker.clone());
    info.load(&array_dir, 0, 10).unwrap();
    assert_eq!(info.fragment_num(), 3);

    // A consolidated fragment replacing the first two.
    let name = fragment_name(1, 2, "g000c", 16);
    let consolidated_uri = Uri::new(dir.path().join(&name));
    let mut consolidated =
        write_sparse_2d(&resources, &tracker, &schema, consolidated_uri.clone(), (1, 2));
    consolidated.store(&key()).unwrap();

    info.load_and_replace(&consolidated_uri, &fragments[0..2])
        .unwrap();
    assert_eq!(info.fragment_num(), 2);
    assert_eq!(info.get_timestamp_range(0).unwrap(), (1, 2));
    assert_eq!(info.fragment(0).unwrap().uri(), &consolidated_uri);
    assert_eq!(info.get_timestamp_range(1).unwrap(), (3, 3));

    // Replacing a non-contiguous run is refused.
    let bad = vec![fragments[2].clone(), fragments[0].clone()];
    assert!(info.load_and_replace(&consolidated_uri, &bad).is_err());
}

#[test]
fn fragment_info_cancellation() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let array_uri = Uri::new(dir.path());

    let name = fragment_name(1, 1, "h0001", 16);
    let uri = Uri::new(dir.path().join(&name));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, uri.clone(), (1, 1));
    meta.store(&key()).unwrap();

    let array_dir = ArrayDirectory::new(
        array_uri.clone(),
        vec![TimestampedUri {
            uri,
            timestamp_range: (1, 1),
            version: 16,
        }],
        Vec::new(),
        schema.clone(),
        schema_map(&schema),
    );

    resources.cancel();
    let mut info = FragmentInfo::new(array_uri, resources.clone(), tracker);
    assert!(info.load(&array_dir, 0, 10).is_err());
}

#[test]
fn vacuum_files_are_listed() {
    let resources = resources();
    let tracker = Arc::new(MemoryTracker::unbounded());
    let schema = sparse_2d_schema();
    let dir = TempDir::new().unwrap();
    let array_uri = Uri::new(dir.path());

    let name = fragment_name(1, 1, "v0001", 16);
    let frag_uri = Uri::new(dir.path().join(&name));
    let mut meta = write_sparse_2d(&resources, &tracker, &schema, frag_uri.clone(), (1, 1));
    meta.store(&key()).unwrap();

    std::fs::write(
        dir.path().join("__1_1_v000c_16.vac"),
        format!("{frag_uri}\n"),
    )
    .unwrap();

    let array_dir = ArrayDirectory::open(
        &resources,
        array_uri.clone(),
        schema.clone(),
        schema_map(&schema),
    )
    .unwrap();
    assert_eq!(array_dir.to_vacuum(), &[frag_uri]);

    let mut info = FragmentInfo::new(array_uri, resources, tracker);
    info.load(&array_dir, 0, 10).unwrap();
    assert_eq!(info.to_vacuum_num(), 1);
}
