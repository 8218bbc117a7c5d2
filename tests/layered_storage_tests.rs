//! LayeredStorage tests against real directories

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use layerstore::storage::LayeredStorage;
use serde::Serialize;
use layerstore::{
    Config, FixedLayerProvider, Key, LayerDescriptor, Storage, StorageManager, StorageRef,
    StoreError, UnitDescriptor, DENOM,
};
use tempfile::TempDir;

fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

fn config_for(dir: &Path) -> Config {
    Config::builder().data_dir(dir).build()
}

fn open_single(dir: &Path, uri: &str) -> StorageManager {
    StorageManager::builder(config_for(dir))
        .provider(FixedLayerProvider::single(uri))
        .build()
        .unwrap()
}

fn open_layers(dir: &Path, layers: Vec<LayerDescriptor>) -> StorageManager {
    StorageManager::builder(config_for(dir))
        .provider(FixedLayerProvider::new(layers))
        .build()
        .unwrap()
}

fn put(manager: &StorageManager, unit_id: i32, record: &str, value: &str) {
    let mut out = manager.get_output_stream(&Key::new(unit_id, record));
    out.write_utf(value).unwrap();
    out.commit().unwrap();
}

fn get(manager: &StorageManager, unit_id: i32, record: &str) -> Option<String> {
    manager
        .get_input_stream(&Key::new(unit_id, record))
        .unwrap()
        .map(|mut input| input.read_utf().unwrap())
}

fn weight_of(manager: &StorageManager, unit_id: i32) -> u32 {
    match manager.lookup_storage(unit_id) {
        StorageRef::Active(storage) => storage.maintenance_weight(),
        StorageRef::Closed => panic!("storage of {} is closed", unit_id),
    }
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_get_overwrite_remove() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    assert_eq!(get(&manager, doc, "a"), None);

    put(&manager, doc, "a", "one");
    assert_eq!(get(&manager, doc, "a").as_deref(), Some("one"));

    put(&manager, doc, "a", "two");
    assert_eq!(get(&manager, doc, "a").as_deref(), Some("two"));

    manager.remove(&Key::new(doc, "a")).unwrap();
    assert_eq!(get(&manager, doc, "a"), None);

    // removing an absent record is fine
    manager.remove(&Key::new(doc, "never-written")).unwrap();
}

#[test]
fn test_reads_do_not_create_segment_files() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    let seg_path = temp_dir.path().join("local").join("unit_00000.seg");

    assert_eq!(get(&manager, doc, "never-written"), None);
    manager.open(doc).unwrap();
    manager.close(doc, false, &HashSet::new()).unwrap();
    assert!(!seg_path.exists());

    put(&manager, doc, "k", "v");
    assert!(seg_path.exists());
}

#[test]
fn test_unit_ids_are_stable_per_name() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");

    let a = manager.get_unit_id(&UnitDescriptor::new("a")).unwrap();
    let b = manager.get_unit_id(&UnitDescriptor::new("b")).unwrap();
    manager.forget_unit(&UnitDescriptor::new("a"));
    let a_again = manager.get_unit_id(&UnitDescriptor::new("a")).unwrap();

    assert_eq!(a, DENOM);
    assert_eq!(b, DENOM + 1);
    assert_eq!(a, a_again);
    assert_eq!(manager.get_unit_name(b).unwrap().as_deref(), Some("b"));
}

#[test]
fn test_data_survives_restart() {
    let temp_dir = setup_temp_dir();

    let doc = {
        let manager = open_single(temp_dir.path(), "local");
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        manager.get_unit_id(&UnitDescriptor::new("other")).unwrap();
        for i in 0..100 {
            put(&manager, doc, &format!("key_{:03}", i), &format!("value_{}", i));
        }
        manager.remove(&Key::new(doc, "key_050")).unwrap();
        manager.shutdown();
        doc
    };

    let manager = open_single(temp_dir.path(), "local");
    assert_eq!(manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap(), doc);
    assert_eq!(
        manager.get_unit_id(&UnitDescriptor::new("other")).unwrap(),
        doc + 1
    );
    assert_eq!(get(&manager, doc, "key_000").as_deref(), Some("value_0"));
    assert_eq!(get(&manager, doc, "key_099").as_deref(), Some("value_99"));
    assert_eq!(get(&manager, doc, "key_050"), None);
    assert_eq!(manager.get_unit_name(doc).unwrap().as_deref(), Some("doc"));
}

#[test]
fn test_remove_unit_keeps_its_id() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    put(&manager, doc, "a", "1");
    put(&manager, doc, "b", "2");
    manager.get_file_id_by_name(doc, "src/main.rs").unwrap();

    manager.remove_unit(doc).unwrap();

    assert_eq!(get(&manager, doc, "a"), None);
    assert_eq!(get(&manager, doc, "b"), None);
    assert_eq!(manager.get_file_name_by_idx(doc, 0).unwrap(), None);
    assert_eq!(manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap(), doc);
}

// =============================================================================
// File Paths Dictionary
// =============================================================================

#[test]
fn test_file_ids_are_interned_and_persisted() {
    let temp_dir = setup_temp_dir();

    let doc = {
        let manager = open_single(temp_dir.path(), "local");
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        assert_eq!(manager.get_file_id_by_name(doc, "a.txt").unwrap(), Some(0));
        assert_eq!(manager.get_file_id_by_name(doc, "b.txt").unwrap(), Some(1));
        assert_eq!(manager.get_file_id_by_name(doc, "a.txt").unwrap(), Some(0));
        assert_eq!(
            manager.get_file_name_by_idx(doc, 1).unwrap().as_deref(),
            Some("b.txt")
        );
        assert_eq!(manager.get_file_name_by_idx(doc, 7).unwrap(), None);
        manager.shutdown();
        doc
    };

    let manager = open_single(temp_dir.path(), "local");
    manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert_eq!(
        manager.get_file_name_by_idx(doc, 0).unwrap().as_deref(),
        Some("a.txt")
    );
    assert_eq!(manager.get_file_id_by_name(doc, "b.txt").unwrap(), Some(1));
    assert_eq!(manager.get_file_id_by_name(doc, "c.txt").unwrap(), Some(2));
}

#[test]
fn test_atomic_writes_leave_neighbours_alone() {
    let temp_dir = setup_temp_dir();
    let layer_dir = temp_dir.path().join("local");
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    // shares the stem of both the dictionary and the segment
    let neighbour = layer_dir.join("unit_00000.tmp");
    fs::write(&neighbour, b"not ours").unwrap();

    manager.get_file_id_by_name(doc, "a.rs").unwrap();
    put(&manager, doc, "k", "v");
    manager.flush();
    manager.shutdown();

    assert_eq!(fs::read(&neighbour).unwrap(), b"not ours");
    assert!(!layer_dir.join("unit_00000.dict.tmp").exists());
    assert!(!layer_dir.join("layer.idx.tmp").exists());

    let manager = open_single(temp_dir.path(), "local");
    manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert_eq!(
        manager.get_file_name_by_idx(doc, 0).unwrap().as_deref(),
        Some("a.rs")
    );
}

#[test]
fn test_corrupted_dictionary_is_reported() {
    let temp_dir = setup_temp_dir();
    {
        let manager = open_single(temp_dir.path(), "local");
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        manager.get_file_id_by_name(doc, "a.txt").unwrap();
        manager.shutdown();
    }

    let dict = temp_dir.path().join("local").join("unit_00000.dict");
    let mut raw = fs::read(&dict).unwrap();
    raw[0] ^= 0xFF;
    fs::write(&dict, raw).unwrap();

    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert!(matches!(
        manager.get_file_name_by_idx(doc, 0),
        Err(StoreError::Corruption(_))
    ));
}

// =============================================================================
// Layers
// =============================================================================

#[test]
fn test_reads_fall_back_to_lower_layers() {
    let temp_dir = setup_temp_dir();
    {
        let base = open_single(temp_dir.path(), "base");
        let doc = base.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        put(&base, doc, "shared", "base-value");
        put(&base, doc, "masked", "base-masked");
        base.shutdown();
    }

    let layers = vec![LayerDescriptor::new("top"), LayerDescriptor::read_only("base")];
    {
        let manager = open_layers(temp_dir.path(), layers.clone());
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

        assert_eq!(get(&manager, doc, "shared").as_deref(), Some("base-value"));

        put(&manager, doc, "shared", "top-value");
        assert_eq!(get(&manager, doc, "shared").as_deref(), Some("top-value"));

        manager.remove(&Key::new(doc, "masked")).unwrap();
        assert_eq!(get(&manager, doc, "masked"), None);
        manager.shutdown();
    }

    // the lower layer itself is untouched
    {
        let base = open_single(temp_dir.path(), "base");
        let doc = base.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        assert_eq!(get(&base, doc, "shared").as_deref(), Some("base-value"));
        assert_eq!(get(&base, doc, "masked").as_deref(), Some("base-masked"));
        base.shutdown();
    }

    // tombstones in the upper layer survive a restart
    let manager = open_layers(temp_dir.path(), layers);
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert_eq!(get(&manager, doc, "masked"), None);
    assert_eq!(get(&manager, doc, "shared").as_deref(), Some("top-value"));
}

#[test]
fn test_unit_missing_from_lower_layer() {
    let temp_dir = setup_temp_dir();
    let manager = open_layers(
        temp_dir.path(),
        vec![LayerDescriptor::new("top"), LayerDescriptor::read_only("absent")],
    );
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    assert_eq!(get(&manager, doc, "k"), None);
    put(&manager, doc, "k", "v");
    assert_eq!(get(&manager, doc, "k").as_deref(), Some("v"));
    assert!(!temp_dir.path().join("absent").exists());
}

#[test]
fn test_file_uri_layer_uses_absolute_path() {
    let temp_dir = setup_temp_dir();
    let layer_dir = setup_temp_dir();
    let uri = format!("file://{}", layer_dir.path().display());

    let manager = open_single(temp_dir.path(), &uri);
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    put(&manager, doc, "k", "v");
    manager.shutdown();

    assert!(layer_dir.path().join("layer.idx").exists());
    assert!(layer_dir.path().join("unit_00000.seg").exists());
}

// =============================================================================
// Unit Lifecycle
// =============================================================================

#[test]
fn test_close_clean_discards_unrequired_units() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let keep = manager.get_unit_id(&UnitDescriptor::new("keep")).unwrap();
    let drop_me = manager.get_unit_id(&UnitDescriptor::new("drop")).unwrap();

    manager.open(keep).unwrap();
    manager.open(drop_me).unwrap();
    put(&manager, keep, "k", "kept");
    put(&manager, drop_me, "k", "dropped");

    let required: HashSet<i32> = [keep].into_iter().collect();
    manager.close(keep, true, &required).unwrap();
    manager.close(drop_me, true, &required).unwrap();

    assert_eq!(get(&manager, keep, "k").as_deref(), Some("kept"));
    assert_eq!(get(&manager, drop_me, "k"), None);
    assert_eq!(manager.get_unit_name(drop_me).unwrap().as_deref(), Some("drop"));
}

#[test]
fn test_close_without_clean_keeps_data() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    manager.open(doc).unwrap();
    put(&manager, doc, "k", "v");
    manager.get_file_id_by_name(doc, "x.rs").unwrap();
    manager.close(doc, false, &HashSet::new()).unwrap();

    assert_eq!(get(&manager, doc, "k").as_deref(), Some("v"));
    assert_eq!(
        manager.get_file_name_by_idx(doc, 0).unwrap().as_deref(),
        Some("x.rs")
    );
}

#[test]
fn test_open_unit_tracking() {
    let temp_dir = setup_temp_dir();
    let config = config_for(temp_dir.path());
    let storage = LayeredStorage::open(3, vec![LayerDescriptor::new("local")], &config).unwrap();
    let doc = storage.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    assert_eq!(doc, 3 * DENOM);
    storage.open_unit(doc).unwrap();
    assert_eq!(storage.open_unit_count(), 1);
    // unknown units are ignored
    storage.open_unit(3 * DENOM + 9).unwrap();
    assert_eq!(storage.open_unit_count(), 1);
    storage.close_unit(doc, false, &HashSet::new()).unwrap();
    assert_eq!(storage.open_unit_count(), 0);
}

// =============================================================================
// Storage Contract
// =============================================================================

#[test]
fn test_storage_needs_a_layer() {
    let temp_dir = setup_temp_dir();
    let config = config_for(temp_dir.path());
    assert!(LayeredStorage::open(1, Vec::new(), &config).is_err());
}

#[test]
fn test_write_to_unknown_unit_fails() {
    let temp_dir = setup_temp_dir();
    let config = config_for(temp_dir.path());
    let storage = LayeredStorage::open(1, vec![LayerDescriptor::new("local")], &config).unwrap();

    let stray = DENOM + 42;
    let result = storage.write(&Key::new(stray, "k"), Bytes::from_static(b"v"));
    assert!(matches!(result, Err(StoreError::UnknownUnit(id)) if id == stray));
    assert_eq!(storage.read(&Key::new(stray, "k")).unwrap(), None);
    assert_eq!(storage.unit_name(stray).unwrap(), None);
}

#[test]
fn test_storage_refuses_work_after_shutdown() {
    let temp_dir = setup_temp_dir();
    let config = config_for(temp_dir.path());
    let storage = LayeredStorage::open(1, vec![LayerDescriptor::new("local")], &config).unwrap();
    let doc = storage.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    storage
        .write(&Key::new(doc, "k"), Bytes::from_static(b"v"))
        .unwrap();

    storage.shutdown().unwrap();
    storage.shutdown().unwrap();

    assert!(matches!(
        storage.read(&Key::new(doc, "k")),
        Err(StoreError::ShutDown)
    ));
    assert!(matches!(
        storage.get_unit_id(&UnitDescriptor::new("doc")),
        Err(StoreError::ShutDown)
    ));
    assert_eq!(storage.maintenance_weight(), 0);
    storage.flush().unwrap();
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_torn_tail_is_truncated() {
    let temp_dir = setup_temp_dir();
    let seg_path = temp_dir.path().join("local").join("unit_00000.seg");

    let doc = {
        let manager = open_single(temp_dir.path(), "local");
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        put(&manager, doc, "a", "first");
        put(&manager, doc, "b", "second");
        manager.shutdown();
        doc
    };
    let clean_len = fs::metadata(&seg_path).unwrap().len();

    // half-written entry header and some garbage
    let mut file = OpenOptions::new().append(true).open(&seg_path).unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF, 0x05, 0x00, 0x00]).unwrap();
    drop(file);

    let manager = open_single(temp_dir.path(), "local");
    manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert_eq!(get(&manager, doc, "a").as_deref(), Some("first"));
    assert_eq!(get(&manager, doc, "b").as_deref(), Some("second"));
    assert_eq!(fs::metadata(&seg_path).unwrap().len(), clean_len);

    put(&manager, doc, "c", "third");
    manager.shutdown();

    let manager = open_single(temp_dir.path(), "local");
    manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert_eq!(get(&manager, doc, "c").as_deref(), Some("third"));
}

#[test]
fn test_persist_version_mismatch_discards_layer() {
    let temp_dir = setup_temp_dir();
    {
        let manager = open_single(temp_dir.path(), "local");
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        manager.get_unit_id(&UnitDescriptor::new("other")).unwrap();
        put(&manager, doc, "k", "old");
        manager.shutdown();
    }

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .persist_mechanism_version(2)
        .build();
    let manager = StorageManager::builder(config)
        .provider(FixedLayerProvider::single("local"))
        .build()
        .unwrap();

    // unit table starts over
    let other = manager.get_unit_id(&UnitDescriptor::new("other")).unwrap();
    assert_eq!(other, DENOM);
    assert_eq!(get(&manager, other, "k"), None);
    assert_eq!(manager.get_unit_name(DENOM + 1).unwrap(), None);
}

#[derive(Serialize)]
struct IndexFile {
    persist_version: u32,
    next_local_id: i32,
    units: Vec<IndexEntry>,
}

#[derive(Serialize)]
struct IndexEntry {
    local_id: i32,
    name: String,
}

#[test]
fn test_unit_capacity_is_enforced() {
    let temp_dir = setup_temp_dir();
    let layer_dir = temp_dir.path().join("local");
    fs::create_dir_all(&layer_dir).unwrap();

    // a layer with one unit left before the local ID space runs out
    let index = IndexFile {
        persist_version: 1,
        next_local_id: DENOM - 1,
        units: vec![IndexEntry {
            local_id: 0,
            name: "doc".to_string(),
        }],
    };
    fs::write(layer_dir.join("layer.idx"), bincode::serialize(&index).unwrap()).unwrap();

    let last = {
        let manager = open_single(temp_dir.path(), "local");
        let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
        assert_eq!(doc, DENOM);

        let last = manager.get_unit_id(&UnitDescriptor::new("last")).unwrap();
        assert_eq!(last, 2 * DENOM - 1);
        assert_eq!(manager.get_storage_id(last), 1);

        let result = manager.get_unit_id(&UnitDescriptor::new("overflow"));
        assert!(matches!(
            result,
            Err(StoreError::UnitCapacityExceeded { storage_id: 1 })
        ));

        // existing units are unaffected
        put(&manager, last, "k", "v");
        assert_eq!(get(&manager, last, "k").as_deref(), Some("v"));
        assert_eq!(manager.get_unit_name(last).unwrap().as_deref(), Some("last"));
        manager.shutdown();
        last
    };

    let manager = open_single(temp_dir.path(), "local");
    assert_eq!(manager.get_unit_id(&UnitDescriptor::new("last")).unwrap(), last);
    assert_eq!(manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap(), DENOM);
    assert_eq!(get(&manager, last, "k").as_deref(), Some("v"));
    assert!(matches!(
        manager.get_unit_id(&UnitDescriptor::new("overflow")),
        Err(StoreError::UnitCapacityExceeded { storage_id: 1 })
    ));
}

// =============================================================================
// Maintenance
// =============================================================================

#[test]
fn test_maintenance_compacts_fragmented_units() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    for round in 0..20 {
        for key in 0..10 {
            put(&manager, doc, &format!("k{}", key), &format!("round {}", round));
        }
    }
    let before = weight_of(&manager, doc);
    assert!(before >= 90, "weight was {}", before);

    assert!(!manager.maintenance(Duration::from_secs(5)));

    assert_eq!(weight_of(&manager, doc), 0);
    for key in 0..10 {
        assert_eq!(
            get(&manager, doc, &format!("k{}", key)).as_deref(),
            Some("round 19")
        );
    }

    manager.shutdown();
    let manager = open_single(temp_dir.path(), "local");
    manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();
    assert_eq!(get(&manager, doc, "k3").as_deref(), Some("round 19"));
}

#[test]
fn test_maintenance_skips_storages_below_threshold() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let doc = manager.get_unit_id(&UnitDescriptor::new("doc")).unwrap();

    for key in 0..50 {
        put(&manager, doc, &format!("k{}", key), "v");
    }
    // one overwrite in fifty is below the default threshold
    put(&manager, doc, "k0", "w");
    let weight = weight_of(&manager, doc);
    assert!(weight < manager.config().defrag_threshold);

    let seg_path = temp_dir.path().join("local").join("unit_00000.seg");
    let len_before = fs::metadata(&seg_path).unwrap().len();
    assert!(!manager.maintenance(Duration::from_secs(1)));
    assert_eq!(fs::metadata(&seg_path).unwrap().len(), len_before);
}

fn fragment(storage: &LayeredStorage, unit_id: i32, rounds: usize) {
    for round in 0..rounds {
        for key in 0..10 {
            let value = Bytes::from(format!("round {}", round));
            storage
                .write(&Key::new(unit_id, format!("k{}", key)), value)
                .unwrap();
        }
    }
}

#[test]
fn test_zero_budget_still_makes_progress() {
    let temp_dir = setup_temp_dir();
    let config = config_for(temp_dir.path());
    let storage = LayeredStorage::open(1, vec![LayerDescriptor::new("local")], &config).unwrap();
    let a = storage.get_unit_id(&UnitDescriptor::new("a")).unwrap();
    let b = storage.get_unit_id(&UnitDescriptor::new("b")).unwrap();
    fragment(&storage, a, 20);
    fragment(&storage, b, 10);

    let before = storage.maintenance_weight();
    assert!(storage.maintain(Duration::ZERO).unwrap());
    let between = storage.maintenance_weight();
    assert!(between < before, "weight went from {} to {}", before, between);

    assert!(!storage.maintain(Duration::ZERO).unwrap());
    assert_eq!(storage.maintenance_weight(), 0);
    assert!(!storage.maintain(Duration::ZERO).unwrap());

    let read = storage.read(&Key::new(b, "k4")).unwrap().unwrap();
    assert_eq!(read, Bytes::from("round 9"));
}

#[test]
fn test_zero_budget_maintenance_loop_terminates() {
    let temp_dir = setup_temp_dir();
    let manager = open_single(temp_dir.path(), "local");
    let mut units = Vec::new();
    for name in ["a", "b", "c"] {
        let id = manager.get_unit_id(&UnitDescriptor::new(name)).unwrap();
        for round in 0..10 {
            for key in 0..5 {
                put(&manager, id, &format!("k{}", key), &format!("{} {}", name, round));
            }
        }
        units.push(id);
    }

    let mut passes = 0;
    while manager.maintenance(Duration::ZERO) {
        passes += 1;
        assert!(passes < 10, "maintenance did not converge");
    }

    assert!(weight_of(&manager, units[0]) < manager.config().defrag_threshold);
    assert_eq!(get(&manager, units[2], "k1").as_deref(), Some("c 9"));
}
