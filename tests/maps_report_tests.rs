// Integration tests for the offline side: maps parsing, translation and
// report assembly from a synthetic session directory.

use std::fs::File;

use recuento::call_edge::AddressWidth;
use recuento::calls_file::read_calls_file;
use recuento::config::ProfileConfig;
use recuento::maps_file::AddressMap;
use recuento::report::{build_report, SymbolResolver};
use recuento::session::Session;
use recuento::symbolize::{ObjectSymbols, SymbolEntry};
use recuento::Profiler;

const MAPS: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/target
00651000-00652000 r--p 00051000 08:02 173521 /usr/bin/target
7f2c4e4f3000-7f2c4e6b3000 r-xp 00000000 08:02 1048601 /lib/libc.so.6
7ffc7b8f0000-7ffc7b911000 rw-p 00000000 00:00 0 [stack]
";

fn terminate_noop() {}

fn synthetic_session(dir: &tempfile::TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let calls = dir.path().join("calls");
    let maps = dir.path().join("maps");
    std::fs::write(&maps, MAPS).unwrap();

    let config = ProfileConfig {
        address_width: AddressWidth::W64,
        ..ProfileConfig::default()
    };
    let session = Session::with_output(config, Some(File::create(&calls).unwrap()));
    let profiler = Profiler::with_terminate(terminate_noop);
    assert!(profiler.activate(session));

    // Caller inside the main binary, callees split between the binary
    // and libc, plus one address outside every executable region.
    profiler.on_call(0x400100, 0x400200);
    profiler.on_call(0x400100, 0x400200);
    profiler.on_call(0x400100, 0x7f2c_4e4f_3080);
    profiler.on_call(0x400100, 0xdead_0000);
    profiler.flush_on_exit();

    (calls, maps)
}

fn test_resolver() -> SymbolResolver {
    let mut resolver = SymbolResolver::new(true);
    resolver.preload(
        "/usr/bin/target",
        ObjectSymbols::from_entries(vec![
            SymbolEntry {
                addr: 0x100,
                size: 0x40,
                name: "main_caller".into(),
            },
            SymbolEntry {
                addr: 0x200,
                size: 0x40,
                name: "helper".into(),
            },
        ]),
    );
    resolver.preload(
        "/lib/libc.so.6",
        ObjectSymbols::from_entries(vec![SymbolEntry {
            addr: 0x80,
            size: 0x20,
            name: "memcpy".into(),
        }]),
    );
    resolver
}

#[test]
fn test_session_report_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (calls, maps) = synthetic_session(&dir);

    let records = read_calls_file(&calls, Some(AddressWidth::W64)).unwrap();
    assert_eq!(records.len(), 3);

    let map = AddressMap::load(&maps).unwrap();
    let mut resolver = test_resolver();
    let report = build_report(&records, Some(&map), &mut resolver, None);

    assert_eq!(report.total_calls, 4);
    assert_eq!(report.distinct_edges, 3);

    // Highest count first.
    assert_eq!(report.rows[0].count, 2);
    assert_eq!(report.rows[0].caller.symbol.as_deref(), Some("main_caller"));
    assert_eq!(report.rows[0].callee.symbol.as_deref(), Some("helper"));

    let libc_row = report
        .rows
        .iter()
        .find(|r| r.callee.object.as_deref() == Some("/lib/libc.so.6"))
        .unwrap();
    assert_eq!(libc_row.callee.symbol.as_deref(), Some("memcpy"));
    assert_eq!(libc_row.callee.offset, Some(0x80));

    // The address outside every executable region stays raw.
    let unmapped_row = report
        .rows
        .iter()
        .find(|r| r.callee.address == 0xdead_0000)
        .unwrap();
    assert!(unmapped_row.callee.object.is_none());
    assert_eq!(unmapped_row.callee.label(), "0xdead0000");
}

#[test]
fn test_report_json_shape() {
    let dir = tempfile::tempdir().unwrap();
    let (calls, maps) = synthetic_session(&dir);

    let records = read_calls_file(&calls, Some(AddressWidth::W64)).unwrap();
    let map = AddressMap::load(&maps).unwrap();
    let mut resolver = test_resolver();
    let report = build_report(&records, Some(&map), &mut resolver, None);

    let mut out = Vec::new();
    report.write_json(&mut out).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

    assert_eq!(value["total_calls"], 4);
    assert_eq!(value["distinct_edges"], 3);
    let rows = value["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["count"], 2);
    assert_eq!(rows[0]["caller"]["symbol"], "main_caller");
    assert_eq!(rows[0]["caller"]["object"], "/usr/bin/target");
}

#[test]
fn test_non_executable_regions_do_not_resolve() {
    let map = AddressMap::parse(MAPS).unwrap();
    // Inside the r--p data region of the binary.
    assert!(map.translate(0x651100).is_none());
    // Inside [stack], executable bit unset.
    assert!(map.translate(0x7ffc_7b8f_0100).is_none());
}

#[test]
fn test_text_report_renders_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let (calls, maps) = synthetic_session(&dir);

    let records = read_calls_file(&calls, Some(AddressWidth::W64)).unwrap();
    let map = AddressMap::load(&maps).unwrap();
    let mut resolver = test_resolver();
    let report = build_report(&records, Some(&map), &mut resolver, None);

    let mut out = Vec::new();
    report.write_text(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("main_caller"));
    assert!(text.contains("memcpy"));
    assert!(text.contains("total across 3 distinct edges"));
}
