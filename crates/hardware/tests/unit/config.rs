//! Configuration Unit Tests.
//!
//! Parsing from JSON text and files, defaults, derived sizes and validation failures.

use std::io::Write;

use pretty_assertions::assert_eq;
use rstest::rstest;

use tilesim_core::Config;
use tilesim_core::common::{ConfigError, TileId};
use tilesim_core::config::{
    CachingProtocol, DirectoryType, HashFunction, ReplacementPolicy, TotalEntries,
};

#[test]
fn empty_document_is_the_default_system() {
    let config = Config::from_json_str("{}").unwrap();
    assert_eq!(config.general.total_tiles, 4);
    assert_eq!(config.memory_controller_tiles().len(), 4);
    assert_eq!(config.line_size(), 64);
    assert_eq!(config.l2_cache.associativity, 8);
    assert_eq!(config.dram_directory.directory_type, DirectoryType::FullMap);
    assert_eq!(config.general.caching_protocol, CachingProtocol::Msi);
    assert_eq!(config.network.hop_latency, 1);
}

#[rstest]
#[case::exact("exact", DirectoryType::FullMap)]
#[case::broadcast_with_ack("broadcast_with_ack", DirectoryType::LimitedBroadcast)]
#[case::broadcast_no_ack("broadcast_no_ack", DirectoryType::BroadcastNoAck)]
#[case::broadcast_without_replies("broadcast_without_replies", DirectoryType::BroadcastNoAck)]
#[case::ackwise("ackwise", DirectoryType::Ackwise)]
#[case::approximate("approximate", DirectoryType::Ackwise)]
#[case::limitless("limitless", DirectoryType::Limitless)]
fn directory_type_names(#[case] name: &str, #[case] expected: DirectoryType) {
    let json = format!(r#"{{ "dram_directory": {{ "directory_type": "{name}" }} }}"#);
    let config = Config::from_json_str(&json).unwrap();
    assert_eq!(config.dram_directory.directory_type, expected);
}

#[rstest]
#[case::msi("msi", CachingProtocol::Msi)]
#[case::mosi("mosi", CachingProtocol::Mosi)]
#[case::upper("MOSI", CachingProtocol::Mosi)]
#[case::long_name("pr_l1_pr_l2_dram_directory_mosi", CachingProtocol::Mosi)]
fn caching_protocol_names(#[case] name: &str, #[case] expected: CachingProtocol) {
    let json = format!(r#"{{ "general": {{ "caching_protocol": "{name}" }} }}"#);
    let config = Config::from_json_str(&json).unwrap();
    assert_eq!(config.general.caching_protocol, expected);
}

#[test]
fn file_with_every_section() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "general": {{ "total_tiles": 8, "memory_controller_tiles": [0, 4] }},
            "l1_icache": {{ "size_kb": 16, "associativity": 2 }},
            "l1_dcache": {{ "size_kb": 16, "associativity": 2, "hash": "xor_fold" }},
            "l2_cache": {{ "size_kb": 256, "associativity": 8, "replacement_policy": "round_robin",
                           "data_access_time": 6, "tags_access_time": 2, "track_miss_types": true }},
            "dram_directory": {{ "total_entries": 1024, "associativity": 8,
                                 "directory_type": "limitless", "max_hw_sharers": 2,
                                 "limitless_trap_penalty": 40 }},
            "dram": {{ "latency": 80, "per_controller_bandwidth": 4.0, "queue_model_enabled": true }},
            "network": {{ "hop_latency": 3 }}
        }}"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(
        config.memory_controller_tiles(),
        vec![TileId(0), TileId(4)]
    );
    assert_eq!(config.l1_dcache.hash, HashFunction::XorFold);
    assert_eq!(config.l2_cache.replacement_policy, ReplacementPolicy::RoundRobin);
    assert!(config.l2_cache.track_miss_types);
    assert_eq!(config.dram_directory.total_entries, TotalEntries::Fixed(1024));
    assert_eq!(config.dram_directory.directory_type, DirectoryType::Limitless);
    assert_eq!(config.directory_total_entries(), 1024);
    assert!(config.dram.queue_model_enabled);
    assert_eq!(config.network.hop_latency, 3);
}

#[test]
fn auto_directory_covers_twice_the_l2_lines() {
    let config = Config::from_json_str(
        r#"{ "general": { "total_tiles": 4, "memory_controller_tiles": [0, 1] },
             "l2_cache": { "size_kb": 64, "associativity": 4 },
             "dram_directory": { "total_entries": "auto", "associativity": 4 } }"#,
    )
    .unwrap();
    // 1024 lines per L2, 4 tiles, 2 slices: 4096 entries per slice.
    assert_eq!(config.directory_total_entries(), 4096);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[rstest]
#[case::not_json("{ total_tiles: 4 }")]
#[case::wrong_type(r#"{ "general": { "total_tiles": "four" } }"#)]
#[case::unknown_policy(r#"{ "l2_cache": { "replacement_policy": "random" } }"#)]
#[case::unknown_protocol(r#"{ "general": { "caching_protocol": "mesi" } }"#)]
fn bad_documents_are_parse_errors(#[case] json: &str) {
    assert!(matches!(
        Config::from_json_str(json).unwrap_err(),
        ConfigError::Parse(_)
    ));
}

#[rstest]
#[case::no_tiles(r#"{ "general": { "total_tiles": 0 } }"#)]
#[case::too_many_tiles(r#"{ "general": { "total_tiles": 4096 } }"#)]
#[case::odd_line(r#"{ "l1_icache": { "line_size": 48 } }"#)]
#[case::odd_sets(r#"{ "l2_cache": { "size_kb": 96, "associativity": 8 } }"#)]
#[case::line_mismatch(r#"{ "l1_dcache": { "line_size": 32 } }"#)]
#[case::controller_out_of_range(r#"{ "general": { "total_tiles": 2, "memory_controller_tiles": [5] } }"#)]
#[case::directory_not_divisible(r#"{ "dram_directory": { "total_entries": 100, "associativity": 16 } }"#)]
fn invalid_geometry_is_rejected(#[case] json: &str) {
    let err = Config::from_json_str(json).unwrap_err();
    assert!(
        !matches!(err, ConfigError::Parse(_) | ConfigError::Io(_)),
        "expected a validation error, got {err:?}"
    );
}

#[test]
fn line_mismatch_names_every_level() {
    let err = Config::from_json_str(r#"{ "l1_dcache": { "line_size": 32 } }"#).unwrap_err();
    match err {
        ConfigError::LineSizeMismatch { l1i, l1d, l2 } => assert_eq!((l1i, l1d, l2), (64, 32, 64)),
        other => panic!("unexpected error {other:?}"),
    }
}
