// Integration tests for the on-disk record format: layout, ordering and
// byte-for-byte determinism of repeated runs.

use std::fs::File;
use std::path::PathBuf;

use recuento::call_edge::AddressWidth;
use recuento::config::ProfileConfig;
use recuento::record::record_bytes;
use recuento::session::Session;
use recuento::Profiler;

fn terminate_noop() {}

fn run_session(width: AddressWidth, dir: &tempfile::TempDir, name: &str, calls: &[(u64, u64)]) -> PathBuf {
    let path = dir.path().join(name);
    let config = ProfileConfig {
        address_width: width,
        ..ProfileConfig::default()
    };
    let session = Session::with_output(config, Some(File::create(&path).unwrap()));
    let profiler = Profiler::with_terminate(terminate_noop);
    assert!(profiler.activate(session));
    for &(caller, callsite) in calls {
        profiler.on_call(caller, callsite);
    }
    profiler.flush_on_exit();
    path
}

#[test]
fn test_exact_byte_layout_w32() {
    let dir = tempfile::tempdir().unwrap();
    let path = run_session(
        AddressWidth::W32,
        &dir,
        "calls",
        &[
            (0x1000, 0x2000),
            (0x1000, 0x2000),
            (0x1000, 0x2000),
            (0x1000, 0x3000),
        ],
    );

    let bytes = std::fs::read(&path).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&0x1000u32.to_ne_bytes());
    expected.extend_from_slice(&0x2000u32.to_ne_bytes());
    expected.extend_from_slice(&3u64.to_ne_bytes());
    expected.extend_from_slice(&0x1000u32.to_ne_bytes());
    expected.extend_from_slice(&0x3000u32.to_ne_bytes());
    expected.extend_from_slice(&1u64.to_ne_bytes());
    assert_eq!(bytes, expected);
}

#[test]
fn test_exact_byte_layout_w64() {
    let dir = tempfile::tempdir().unwrap();
    let path = run_session(AddressWidth::W64, &dir, "calls", &[(0xabcd_0000_1111, 0x42)]);

    let bytes = std::fs::read(&path).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&0xabcd_0000_1111u64.to_ne_bytes());
    expected.extend_from_slice(&0x42u64.to_ne_bytes());
    expected.extend_from_slice(&1u64.to_ne_bytes());
    assert_eq!(bytes, expected);
}

#[test]
fn test_no_header_no_footer() {
    let dir = tempfile::tempdir().unwrap();
    let path = run_session(AddressWidth::W64, &dir, "calls", &[(1, 2), (3, 4)]);
    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len, 2 * record_bytes(AddressWidth::W64) as u64);
}

#[test]
fn test_identical_call_sequences_produce_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let calls: Vec<(u64, u64)> = (0..500)
        .map(|i| (0x1000 + (i * 7 % 13), 0x2000 + (i * 11 % 17)))
        .collect();

    let a = run_session(AddressWidth::W64, &dir, "calls-a", &calls);
    let b = run_session(AddressWidth::W64, &dir, "calls-b", &calls);

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

#[test]
fn test_insertion_order_does_not_change_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let forward: Vec<(u64, u64)> = (0..100).map(|i| (i % 10, i % 4)).collect();
    let mut reversed = forward.clone();
    reversed.reverse();

    let a = run_session(AddressWidth::W64, &dir, "calls-fwd", &forward);
    let b = run_session(AddressWidth::W64, &dir, "calls-rev", &reversed);

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}

#[test]
fn test_width_promotion_rewrites_whole_file_wide() {
    let dir = tempfile::tempdir().unwrap();
    // Configured 32-bit, but one address needs 64: every record in the
    // file must use the wide layout, including the narrow ones.
    let path = run_session(
        AddressWidth::W32,
        &dir,
        "calls",
        &[(0x10, 0x20), (0x1_0000_0000, 0x30)],
    );

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 2 * record_bytes(AddressWidth::W64));
    assert_eq!(bytes[0..8], 0x10u64.to_ne_bytes());
    assert_eq!(bytes[8..16], 0x20u64.to_ne_bytes());
}
