//! Unit tests for the Scaleway helpers that need no network.

use rstest::rstest;
use serde_json::json;

use super::http::api_error;
use super::images::{first_in_zones, image_id_from_href, map_image_state, render_tags};
use super::types::credential_tag;
use super::*;
use crate::provider::{ProviderError, ProviderErrorKind};
use crate::spec::{SpecDocument, Tag};

fn spec_with(base_image: &serde_json::Value, region: Option<&str>) -> BuildSpec {
    let mut doc = json!({
        "name": "web-base",
        "description": "web image",
        "user": "root",
        "instance_type": "DEV1-S",
        "base_image": base_image,
        "uploads": {},
        "commands": []
    });
    if let (Some(zone), Some(object)) = (region, doc.as_object_mut()) {
        object.insert(String::from("region"), json!(zone));
    }
    SpecDocument::parse(&doc.to_string())
        .and_then(|parsed| parsed.into_spec(false))
        .expect("valid spec")
}

#[rstest]
#[case(404, r#"{"type":"not_found","message":"server not found"}"#, ProviderErrorKind::NotFound)]
#[case(409, r#"{"type":"conflict","message":"name taken"}"#, ProviderErrorKind::Collision)]
#[case(403, r#"{"type":"quotas_exceeded","message":"too many servers"}"#, ProviderErrorKind::Quota)]
#[case(400, r#"{"type":"invalid_request_error","message":"Quota reached"}"#, ProviderErrorKind::Quota)]
#[case(500, "gateway exploded", ProviderErrorKind::Other)]
fn api_errors_are_classified(
    #[case] status: u16,
    #[case] body: &str,
    #[case] expected: ProviderErrorKind,
) {
    assert_eq!(api_error(status, body.as_bytes()).kind(), expected);
}

#[test]
fn unparseable_error_body_keeps_text() {
    let err = api_error(502, b"bad gateway");
    assert!(matches!(
        err,
        ScalewayProviderError::Api { status: Some(502), ref message, .. } if message == "bad gateway"
    ));
}

#[test]
fn credential_tag_names_the_key() {
    assert_eq!(credential_tag("ofen-key-ab12"), "ofen-key:ofen-key-ab12");
}

#[rstest]
#[case("/images/7f1c", Some("7f1c"))]
#[case("https://api.scaleway.com/instance/v1/zones/fr-par-1/images/7f1c/", Some("7f1c"))]
#[case("/servers/1", None)]
#[case("/images/", None)]
fn backup_task_reference_yields_image_id(#[case] href: &str, #[case] expected: Option<&str>) {
    assert_eq!(image_id_from_href(href), expected);
}

#[rstest]
#[case("creating", ImageStatus::Pending)]
#[case("available", ImageStatus::Available)]
#[case("error", ImageStatus::Failed)]
fn image_states_map_to_neutral_status(#[case] state: &str, #[case] expected: ImageStatus) {
    assert_eq!(map_image_state(state), expected);
}

#[test]
fn tags_render_as_key_value_strings() {
    let tags = [Tag::new("Name", "web-base"), Tag::new("owner", "ops")];
    assert_eq!(render_tags(&tags), vec!["Name=web-base", "owner=ops"]);
}

#[test]
fn spec_needs_an_image_for_its_zone() {
    let spec = spec_with(&json!({"nl-ams-1": "ubuntu_noble"}), Some("fr-par-1"));
    let err = check_scaleway_spec(&spec).expect_err("missing zone entry");
    assert!(matches!(err, ScalewayProviderError::Spec(ref msg) if msg.contains("fr-par-1")));
}

#[test]
fn spec_needs_a_zone() {
    let spec = spec_with(&json!({"fr-par-1": "ubuntu_noble"}), None);
    assert!(check_scaleway_spec(&spec).is_err());
}

#[test]
fn spec_with_zone_image_passes() {
    let spec = spec_with(&json!({"fr-par-1": "ubuntu_noble"}), Some("fr-par-1"));
    assert!(check_scaleway_spec(&spec).is_ok());
}

#[test]
fn missing_secret_key_is_a_config_error() {
    let result = ScalewayProvider::new(ScalewayConfig {
        access_key: None,
        secret_key: String::new(),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("fr-par-1"),
        image_zones: String::from("fr-par-1,nl-ams-1"),
        default_architecture: String::from("x86_64"),
        api_url: String::from("https://api.scaleway.com"),
    });
    assert!(matches!(result, Err(ScalewayProviderError::Config(ref msg)) if msg.contains("SCW_SECRET_KEY")));
}

fn zones(names: &[&str]) -> Vec<String> {
    names.iter().map(|zone| (*zone).to_owned()).collect()
}

#[tokio::test]
async fn image_outside_default_zone_is_found() {
    let searched = std::sync::Mutex::new(Vec::new());

    let found = first_in_zones(&zones(&["fr-par-1", "nl-ams-1", "pl-waw-1"]), |zone| {
        searched
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(zone.clone());
        async move {
            Ok::<_, ScalewayProviderError>((zone == "nl-ams-1").then(|| String::from("img-7")))
        }
    })
    .await
    .expect("lookup succeeds");

    assert_eq!(found, Some((String::from("nl-ams-1"), String::from("img-7"))));
    assert_eq!(
        *searched.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        ["fr-par-1", "nl-ams-1"]
    );
}

#[tokio::test]
async fn image_missing_everywhere_is_none() {
    let found = first_in_zones(&zones(&["fr-par-1", "nl-ams-1"]), |_| async {
        Ok::<Option<String>, ScalewayProviderError>(None)
    })
    .await
    .expect("lookup succeeds");

    assert_eq!(found, None);
}

#[tokio::test]
async fn zone_error_stops_the_search() {
    let result = first_in_zones(&zones(&["fr-par-1", "nl-ams-1"]), |zone| async move {
        if zone == "fr-par-1" {
            Err(api_error(403, br#"{"type":"permissions_denied","message":"zone closed"}"#))
        } else {
            Ok(Some(String::from("img-9")))
        }
    })
    .await;

    assert!(matches!(result, Err(ScalewayProviderError::Api { status: Some(403), .. })));
}
