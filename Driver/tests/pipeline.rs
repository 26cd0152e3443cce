use fanwatch_driver::{
    ChangeEvent, ChangeType, DriverError, DriverResult, FanMask, FileIdentity, HandleResolver,
    Listener, ListenerConfig, ListenerState, RecordBuilder, RecordReader,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::sync_channel;

/// Maps handle bytes to paths; unknown handles behave like vanished objects.
struct TableResolver {
    paths: HashMap<Vec<u8>, PathBuf>,
}

impl TableResolver {
    fn new(entries: &[(&str, &str)]) -> Self {
        TableResolver {
            paths: entries
                .iter()
                .map(|(handle, path)| (handle.as_bytes().to_vec(), PathBuf::from(path)))
                .collect(),
        }
    }
}

impl HandleResolver for TableResolver {
    fn resolve(&self, identity: &FileIdentity) -> DriverResult<PathBuf> {
        self.paths
            .get(&identity.handle)
            .cloned()
            .ok_or_else(|| DriverError::Resolve {
                operation: "open_by_handle_at",
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }
}

fn fid_record(mask: FanMask, handle: &str) -> Vec<u8> {
    RecordBuilder::new(mask.bits())
        .fid([5, 6], 1, handle.as_bytes())
        .build()
}

fn run_stream(
    stream: Vec<u8>,
    resolver: &TableResolver,
    excluded: &dyn Fn(&Path) -> bool,
) -> (DriverResult<()>, Vec<ChangeEvent>, Listener) {
    let listener = Listener::new(ListenerConfig::default());
    let (tx, rx) = sync_channel(64);
    let result = listener.run(Cursor::new(stream), resolver, excluded, &tx);
    drop(tx);
    let events = rx.iter().collect();
    (result, events, listener)
}

fn keep_all(_: &Path) -> bool {
    false
}

#[test]
fn create_record_yields_creation_event() {
    let resolver = TableResolver::new(&[("h-new", "/data/new.txt")]);
    let (result, events, _) = run_stream(fid_record(FanMask::CREATE, "h-new"), &resolver, &keep_all);

    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![ChangeEvent {
            path: PathBuf::from("/data/new.txt"),
            change_type: ChangeType::Creation,
        }]
    );
}

#[test]
fn moved_from_record_yields_deletion_event() {
    let resolver = TableResolver::new(&[("h-old", "/data/old.txt")]);
    let (_, events, _) = run_stream(fid_record(FanMask::MOVED_FROM, "h-old"), &resolver, &keep_all);

    assert_eq!(
        events,
        vec![ChangeEvent {
            path: PathBuf::from("/data/old.txt"),
            change_type: ChangeType::Deletion,
        }]
    );
}

#[test]
fn deletion_flags_win_when_creation_flags_are_also_set() {
    let resolver = TableResolver::new(&[("h", "/data/both")]);
    let masks = [
        FanMask::CREATE | FanMask::DELETE,
        FanMask::MOVED_TO | FanMask::MOVED_FROM,
        FanMask::CREATE | FanMask::DELETE_SELF,
        FanMask::DELETE,
    ];

    let stream: Vec<u8> = masks.iter().flat_map(|m| fid_record(*m, "h")).collect();
    let (_, events, _) = run_stream(stream, &resolver, &keep_all);

    assert_eq!(events.len(), masks.len());
    assert!(events.iter().all(|e| e.change_type == ChangeType::Deletion));
}

#[test]
fn records_without_file_identity_emit_nothing() {
    let resolver = TableResolver::new(&[("h", "/data/file")]);
    let mut stream = RecordBuilder::new(FanMask::CREATE.bits())
        .info_block(2, &[0u8; 20])
        .build();
    stream.extend(RecordBuilder::new(FanMask::DELETE.bits()).info_block(4, &[0u8; 4]).build());

    let (result, events, listener) = run_stream(stream, &resolver, &keep_all);

    assert!(result.is_ok());
    assert!(events.is_empty());
    assert_eq!(listener.status().stats.skipped, 2);
    assert_eq!(listener.status().stats.failures, 0);
}

#[test]
fn excluded_paths_never_reach_the_consumer() {
    let resolver = TableResolver::new(&[
        ("a", "/proc/self/status"),
        ("", "/data/keep.txt"),
        ("c", "/proc/1/fd"),
    ]);
    let stream: Vec<u8> = ["a", "", "c"]
        .iter()
        .flat_map(|h| fid_record(FanMask::CREATE, h))
        .collect();

    let exclude_proc = |path: &Path| path.starts_with("/proc");
    let (_, events, listener) = run_stream(stream, &resolver, &exclude_proc);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, PathBuf::from("/data/keep.txt"));
    assert_eq!(listener.status().stats.dropped, 2);
}

#[test]
fn vanished_object_is_skipped_and_loop_continues() {
    let resolver = TableResolver::new(&[("here", "/data/here.txt")]);
    let mut stream = fid_record(FanMask::CREATE, "gone");
    stream.extend(fid_record(FanMask::CREATE, "here"));

    let (result, events, listener) = run_stream(stream, &resolver, &keep_all);

    assert!(result.is_ok());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, PathBuf::from("/data/here.txt"));
    assert_eq!(listener.status().stats.failures, 1);
    assert_eq!(listener.state(), ListenerState::Terminated);
}

#[test]
fn handle_length_past_block_is_skipped() {
    let resolver = TableResolver::new(&[("ok", "/data/ok")]);
    let mut bad = fid_record(FanMask::CREATE, "zz");
    // handle_bytes sits 12 bytes into the identity block, after the 24-byte header
    bad[24 + 12..24 + 16].copy_from_slice(&200u32.to_ne_bytes());
    let mut stream = bad;
    stream.extend(fid_record(FanMask::CREATE, "ok"));

    let (result, events, listener) = run_stream(stream, &resolver, &keep_all);

    assert!(result.is_ok());
    assert_eq!(events.len(), 1);
    assert_eq!(listener.status().stats.failures, 1);
}

#[test]
fn truncated_stream_faults_with_framing_error() {
    let resolver = TableResolver::new(&[("first", "/data/first")]);
    let mut stream = fid_record(FanMask::CREATE, "first");
    let second = fid_record(FanMask::CREATE, "second");
    stream.extend_from_slice(&second[..second.len() - 4]);

    let (result, events, listener) = run_stream(stream, &resolver, &keep_all);

    assert!(matches!(result, Err(DriverError::Framing(_))));
    assert_eq!(events.len(), 1);
    assert_eq!(listener.state(), ListenerState::Faulted);
}

#[test]
fn decoder_never_reads_past_declared_record() {
    let records: Vec<Vec<u8>> = (0u8..16)
        .map(|i| {
            RecordBuilder::new(FanMask::CREATE.bits())
                .fid([5, 6], 1, &vec![i; 4 + i as usize])
                .build()
        })
        .collect();
    let stream: Vec<u8> = records.concat();

    let mut reader = RecordReader::new(Cursor::new(stream));
    let mut expected = 0u64;
    for record in &records {
        reader.read_record().unwrap();
        expected += record.len() as u64;
        assert_eq!(reader.get_ref().position(), expected);
    }
}

#[test]
fn same_stream_decodes_identically_twice() {
    let resolver = TableResolver::new(&[
        ("1", "/data/one"),
        ("2", "/data/two"),
        ("3", "/data/three"),
    ]);
    let mut stream = fid_record(FanMask::CREATE, "1");
    stream.extend(fid_record(FanMask::MOVED_FROM | FanMask::ONDIR, "2"));
    stream.extend(RecordBuilder::new(FanMask::Q_OVERFLOW.bits()).build());
    stream.extend(fid_record(FanMask::MODIFY, "3"));

    let (_, first, _) = run_stream(stream.clone(), &resolver, &keep_all);
    let (_, second, _) = run_stream(stream, &resolver, &keep_all);

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}
