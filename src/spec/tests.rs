//! Unit tests for build spec parsing, validation and tag merging.

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use super::*;

#[fixture]
fn valid() -> Value {
    json!({
        "name": "short",
        "description": "Short example for testing.",
        "user": "ubuntu",
        "region": "fr-par-1",
        "instance_type": "DEV1-S",
        "base_image": {
            "doc-string": "Ubuntu 24.04 images per zone",
            "fr-par-1": "Ubuntu 24.04 Noble Numbat"
        },
        "uploads": {
            "doc-string": "Everything in the source dir is uploaded",
            "files/motd": "/etc/motd"
        },
        "commands": ["apt-get update", "apt-get upgrade -y"]
    })
}

fn document(value: &Value) -> SpecDocument {
    SpecDocument::parse(&value.to_string()).expect("fixture should parse")
}

#[rstest]
fn valid_spec_parses_and_drops_doc_strings(valid: Value) {
    let spec = document(&valid).into_spec(true).expect("valid spec");

    assert_eq!(spec.name, "short");
    assert_eq!(spec.region.as_deref(), Some("fr-par-1"));
    assert_eq!(spec.base_image_for("fr-par-1"), Some("Ubuntu 24.04 Noble Numbat"));
    assert_eq!(spec.base_image_for(DOC_STRING_KEY), None);
    assert_eq!(
        spec.uploads,
        vec![Upload {
            local: Utf8PathBuf::from("files/motd"),
            remote: String::from("/etc/motd"),
        }]
    );
    assert_eq!(spec.commands, vec!["apt-get update", "apt-get upgrade -y"]);
    assert!(spec.tags.is_empty());
}

#[rstest]
#[case("name")]
#[case("description")]
#[case("user")]
#[case("instance_type")]
#[case("base_image")]
#[case("uploads")]
#[case("commands")]
#[case("region")]
fn each_missing_required_key_is_reported(valid: Value, #[case] key: &str) {
    let mut broken = valid;
    broken.as_object_mut().expect("object").remove(key);

    let err = document(&broken)
        .into_spec(true)
        .expect_err("missing key should fail");

    assert_eq!(err, SpecError::MissingKeys(vec![key.to_owned()]));
}

#[rstest]
fn every_missing_key_is_listed_at_once() {
    let err = document(&json!({"name": "x", "commands": null}))
        .into_spec(true)
        .expect_err("sparse spec should fail");

    let SpecError::MissingKeys(keys) = err else {
        panic!("expected MissingKeys, got {err:?}");
    };
    assert_eq!(
        keys,
        vec![
            "description",
            "user",
            "instance_type",
            "base_image",
            "uploads",
            "commands",
            "region"
        ]
    );
}

#[rstest]
fn region_is_optional_for_region_less_providers(valid: Value) {
    let mut local = valid;
    local.as_object_mut().expect("object").remove("region");

    let spec = document(&local)
        .into_spec(false)
        .expect("region-less spec should validate");

    assert_eq!(spec.region, None);
}

#[rstest]
fn empty_name_is_invalid(valid: Value) {
    let mut broken = valid;
    broken["name"] = json!("  ");

    let err = document(&broken).into_spec(true).expect_err("blank name");
    assert_eq!(err, SpecError::Invalid(String::from("name must not be empty")));
}

#[rstest]
fn non_string_upload_target_is_invalid(valid: Value) {
    let mut broken = valid;
    broken["uploads"]["files/motd"] = json!(42);

    let err = document(&broken).into_spec(true).expect_err("bad upload");
    assert!(err.to_string().contains("uploads.files/motd"), "{err}");
}

#[rstest]
#[case(json!("default"), false)]
#[case(json!({"name": "default"}), false)]
#[case(json!({"name": "default", "floating-ip": true}), true)]
fn network_accepts_name_or_object(
    valid: Value,
    #[case] network: Value,
    #[case] floating_ip: bool,
) {
    let mut with_network = valid;
    with_network["network"] = network;

    let spec = document(&with_network).into_spec(true).expect("valid");
    assert_eq!(spec.network.as_deref(), Some("default"));
    assert_eq!(spec.floating_ip, floating_ip);
}

#[test]
fn uploads_keep_document_order() {
    let text = r#"{
        "name": "web-base",
        "description": "web image",
        "user": "ubuntu",
        "instance_type": "DEV1-S",
        "base_image": {"name": "noble"},
        "uploads": {"z.conf": "/etc/app.conf", "a.conf": "/etc/app.conf", "m.conf": "/etc/m.conf"},
        "commands": []
    }"#;

    let spec = SpecDocument::parse(text)
        .and_then(|doc| doc.into_spec(false))
        .expect("valid spec");

    let locals: Vec<&str> = spec.uploads.iter().map(|upload| upload.local.as_str()).collect();
    assert_eq!(locals, ["z.conf", "a.conf", "m.conf"]);
}

#[test]
fn non_object_documents_are_rejected() {
    assert!(matches!(
        SpecDocument::parse("[1, 2]"),
        Err(SpecError::Syntax(_))
    ));
    assert!(matches!(
        SpecDocument::parse("{ not json"),
        Err(SpecError::Syntax(_))
    ));
}

#[rstest]
fn provider_selector_is_readable_before_validation() {
    let doc = document(&json!({"provider": "libvirt"}));
    assert_eq!(doc.provider(), Some("libvirt"));
}

#[rstest]
fn merged_tags_carry_name_description_and_user_tags(valid: Value) {
    let mut tagged = valid;
    tagged["tags"] = json!([{"owner": "x"}]);
    let spec = document(&tagged).into_spec(true).expect("valid");

    let merged = merge_tags(&spec);

    assert_eq!(
        merged,
        vec![
            Tag::new(NAME_TAG, "short"),
            Tag::new(DESCRIPTION_TAG, "Short example for testing."),
            Tag::new("owner", "x"),
        ]
    );
}

#[rstest]
fn build_values_win_over_user_name_tags(valid: Value) {
    let mut tagged = valid;
    tagged["tags"] = json!([{"Name": "override"}, {"team": "infra", "cost": 12}]);
    let spec = document(&tagged).into_spec(true).expect("valid");

    let merged = merge_tags(&spec);

    assert_eq!(merged.first(), Some(&Tag::new(NAME_TAG, "short")));
    assert!(!merged.contains(&Tag::new(NAME_TAG, "override")));
    assert!(merged.contains(&Tag::new("team", "infra")));
    assert!(merged.contains(&Tag::new("cost", "12")));
}

#[rstest]
fn tags_must_be_a_list(valid: Value) {
    let mut tagged = valid;
    tagged["tags"] = json!({"owner": "x"});

    let err = document(&tagged).into_spec(true).expect_err("bad tags");
    assert_eq!(
        err,
        SpecError::Invalid(String::from("tags must be a list of objects"))
    );
}

#[rstest]
fn load_reads_spec_from_disk(valid: Value) {
    let tmp = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("spec.json")).expect("utf8");
    std::fs::write(&path, valid.to_string()).expect("write spec");

    let doc = SpecDocument::load(&path).expect("load spec");

    assert_eq!(doc.region(), Some("fr-par-1"));
}

#[test]
fn load_reports_missing_file() {
    let err = SpecDocument::load(Utf8Path::new("/nonexistent/ofen/spec.json"))
        .expect_err("missing file");
    assert!(matches!(err, SpecError::Read { .. }), "{err}");
}
