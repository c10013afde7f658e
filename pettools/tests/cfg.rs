use pettools::cfg::{Run, RunLimit, SaveRaw, SessionRecord, Singles, StreamSettings};
use pettools::DATA_PORT;
use std::time::Duration;

#[test]
fn serde_roundtrip() {
    let config = Run {
        name: String::from("test_run_serde"),
        limit: Some(RunLimit::Duration(humantime::parse_duration("2min 30s").unwrap())),
        sources: vec![String::from("192.168.1.101"), String::from("192.168.1.102:6000")],
        clks_per_tt: Some(0xF_FFFF),
        seek_reset: Some(0),
        save_raw: Some(SaveRaw::CompressedDir("data".into())),
        singles: vec![Singles::Module(0), Singles::ModuleCounts((3, 1200))],
        sessions: vec![SessionRecord {
            source: String::from("192.168.1.101:5555"),
            bytes: 4096,
            records: 256,
            time_tags: 3,
            resyncs: 0,
            dropped: 0,
            reset_found: Some(true),
            saved: Some("data/2021-06-01_10-00-00_192_168_1_101-5555.raw.zst".into()),
            error: None,
        }],
        ..Default::default()
    };
    let mut buf = Vec::new();
    config.to_writer(&mut buf).unwrap();
    let deconfig = Run::from_reader(&buf[..]).unwrap();
    assert_eq!(config, deconfig);
}

#[test]
fn minimal_declaration() {
    let json = r#"{
        "sources": ["10.0.0.7"],
        "limit": { "Duration": "10s" },
        "stream": { "recv_timeout": "250ms" }
    }"#;
    let run = Run::from_reader(json.as_bytes()).unwrap();
    assert_eq!(run.port, DATA_PORT);
    assert_eq!(run.limit, Some(RunLimit::Duration(Duration::from_secs(10))));
    assert_eq!(
        run.stream,
        StreamSettings {
            recv_timeout: Duration::from_millis(250),
            ..Default::default()
        }
    );
    let sources = run.validate().unwrap();
    assert_eq!(sources[0].to_string(), "10.0.0.7:5555");
    assert_eq!(run.decode_options().modules, u16::MAX);
}

#[test]
fn singles_limit() {
    let json = r#"{ "limit": { "SinglesLimit": [2, 100000] }, "singles": [{ "Module": 2 }] }"#;
    let run = Run::from_reader(json.as_bytes()).unwrap();
    assert_eq!(run.limit, Some(RunLimit::SinglesLimit(2, 100_000)));
    assert_eq!(run.modules_mask(), 1 << 2);
}
