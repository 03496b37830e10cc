//! Focused unit tests covering collect CLI configuration and region files.

use super::*;
use rstest::rstest;
use std::fs;
use tempfile::TempDir;

#[rstest]
#[case(None, Some(PathBuf::from("beaches.db")), ARG_REGIONS, ENV_REGIONS)]
#[case(
    Some(PathBuf::from("regions.json")),
    None,
    ARG_DATABASE,
    ENV_DATABASE
)]
fn converting_without_required_fields_errors(
    #[case] regions: Option<PathBuf>,
    #[case] database: Option<PathBuf>,
    #[case] field: &'static str,
    #[case] env_var: &'static str,
) {
    let args = CollectArgs {
        regions,
        database,
        ..CollectArgs::default()
    };
    let err = CollectConfig::try_from(args).expect_err("missing field should error");
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn conversion_applies_scheduler_defaults() {
    let args = CollectArgs {
        regions: Some(PathBuf::from("regions.json")),
        database: Some(PathBuf::from("beaches.db")),
        ..CollectArgs::default()
    };
    let config = CollectConfig::try_from(args).expect("required fields are present");
    assert!((config.max_area - 4.0).abs() < f64::EPSILON);
    assert!((config.min_area - 0.25).abs() < f64::EPSILON);
    assert_eq!(config.geohash_precision, 8);
    assert_eq!(config.selector_key, "natural");
    assert_eq!(config.selector_value, "beach");
}

#[rstest]
fn conversion_honours_overrides() {
    let args = CollectArgs {
        regions: Some(PathBuf::from("regions.json")),
        database: Some(PathBuf::from("beaches.db")),
        max_area: Some(2.0),
        geohash_precision: Some(6),
        overpass_url: Some("https://overpass.example/api".to_owned()),
        ..CollectArgs::default()
    };
    let config = CollectConfig::try_from(args).expect("required fields are present");
    assert!((config.max_area - 2.0).abs() < f64::EPSILON);
    assert_eq!(config.geohash_precision, 6);
    assert_eq!(config.overpass_url, "https://overpass.example/api");
}

#[rstest]
fn region_file_round_trips_named_regions() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("regions.json");
    fs::write(
        &path,
        r#"[
            {"name": "Western Australia", "south": -35.0, "north": -13.0, "west": 112.0, "east": 129.0},
            {"south": 0.0, "north": 1.0, "west": 0.0, "east": 1.0}
        ]"#,
    )
    .expect("write region file");

    let regions = load_regions(&path).expect("region file should parse");
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].display_name(), "Western Australia");
    assert_eq!(regions[0].south(), -35.0);
    assert_eq!(regions[1].name(), None);
}

#[rstest]
fn region_file_with_inverted_bounds_is_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("regions.json");
    fs::write(
        &path,
        r#"[{"name": "Upside Down", "south": 10.0, "north": -10.0, "west": 0.0, "east": 1.0}]"#,
    )
    .expect("write region file");

    let err = load_regions(&path).expect_err("inverted bounds should fail");
    match err {
        CliError::InvalidRegion { name, .. } => assert_eq!(name, "Upside Down"),
        other => panic!("expected InvalidRegion, found {other:?}"),
    }
}

#[rstest]
fn empty_region_file_is_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("regions.json");
    fs::write(&path, "[]").expect("write region file");

    let err = load_regions(&path).expect_err("empty file should fail");
    assert!(matches!(err, CliError::EmptyRegionFile { .. }));
}

#[rstest]
fn missing_region_file_reports_the_path() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("nowhere.json");

    let err = load_regions(&path).expect_err("missing file should fail");
    match err {
        CliError::RegionFile { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("expected RegionFile, found {other:?}"),
    }
}
