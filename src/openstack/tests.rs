//! Unit tests for OpenStack response handling.

use std::net::{IpAddr, Ipv4Addr};

use rstest::rstest;
use serde_json::json;

use super::floating::public_address_of;
use super::images::{base_image_reference, image_properties, map_image_status};
use super::servers::{addresses_of, launched_with, map_status};
use super::session::{error_message, query_url, select_endpoint, versioned};
use super::types::{CatalogEntry, FloatingIpEnvelope, ServerBody};
use super::*;
use crate::provider::{ProviderError, ProviderErrorKind};
use crate::spec::SpecDocument;

fn catalog() -> Vec<CatalogEntry> {
    serde_json::from_value(json!([
        {
            "type": "compute",
            "endpoints": [
                {"interface": "internal", "region_id": "RegionOne", "url": "http://nova.internal:8774/v2.1"},
                {"interface": "public", "region_id": "RegionOne", "url": "https://nova.one:8774/v2.1/"},
                {"interface": "public", "region_id": "RegionTwo", "url": "https://nova.two:8774/v2.1"}
            ]
        },
        {
            "type": "image",
            "endpoints": [
                {"interface": "public", "region_id": "RegionOne", "url": "https://glance.one:9292"}
            ]
        }
    ]))
    .expect("catalogue")
}

fn server(value: &serde_json::Value) -> ServerBody {
    serde_json::from_value(value.clone()).expect("server body")
}

fn spec(base_image: &serde_json::Value, region: Option<&str>) -> BuildSpec {
    let mut doc = json!({
        "name": "web-base",
        "description": "web image",
        "user": "ubuntu",
        "instance_type": "m1.small",
        "base_image": base_image,
        "uploads": {},
        "commands": []
    });
    if let (Some(value), Some(object)) = (region, doc.as_object_mut()) {
        object.insert(String::from("region"), json!(value));
    }
    SpecDocument::parse(&doc.to_string())
        .and_then(|parsed| parsed.into_spec(false))
        .expect("valid spec")
}

#[test]
fn endpoint_selection_honours_interface_and_region() {
    let entries = catalog();
    assert_eq!(
        select_endpoint(&entries, "compute", "public", Some("RegionTwo")).expect("endpoint"),
        "https://nova.two:8774/v2.1"
    );
    assert_eq!(
        select_endpoint(&entries, "compute", "public", None).expect("endpoint"),
        "https://nova.one:8774/v2.1"
    );
}

#[test]
fn missing_service_names_it() {
    let err = select_endpoint(&catalog(), "network", "public", None).expect_err("absent");
    assert_eq!(
        err,
        OpenStackError::MissingEndpoint {
            service: String::from("network"),
            interface: String::from("public"),
        }
    );
}

#[rstest]
#[case("https://glance:9292", "https://glance:9292/v2")]
#[case("https://glance:9292/v2", "https://glance:9292/v2")]
fn versioned_appends_once(#[case] url: &str, #[case] expected: &str) {
    assert_eq!(versioned(url, "v2"), expected);
}

#[rstest]
#[case("BUILD", InstanceStatus::Pending)]
#[case("ACTIVE", InstanceStatus::Running)]
#[case("SHUTOFF", InstanceStatus::Stopped)]
#[case("DELETED", InstanceStatus::Terminated)]
#[case("ERROR", InstanceStatus::Failed)]
fn nova_status_maps(#[case] status: &str, #[case] expected: InstanceStatus) {
    assert_eq!(map_status(status), expected);
}

#[rstest]
#[case("queued", ImageStatus::Pending)]
#[case("saving", ImageStatus::Pending)]
#[case("active", ImageStatus::Available)]
#[case("killed", ImageStatus::Failed)]
#[case("deleted", ImageStatus::Failed)]
fn glance_status_maps(#[case] status: &str, #[case] expected: ImageStatus) {
    assert_eq!(map_image_status(status), expected);
}

#[test]
fn floating_addresses_are_public() {
    let body = server(&json!({
        "id": "srv",
        "addresses": {
            "tenant": [
                {"addr": "fd00::5", "version": 6, "OS-EXT-IPS:type": "fixed"},
                {"addr": "10.1.0.5", "version": 4, "OS-EXT-IPS:type": "fixed"},
                {"addr": "203.0.113.9", "version": 4, "OS-EXT-IPS:type": "floating"}
            ]
        }
    }));
    let addresses = addresses_of(&body);
    assert_eq!(
        addresses.public,
        Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)))
    );
    assert_eq!(addresses.private, Some(IpAddr::V4(Ipv4Addr::new(10, 1, 0, 5))));
}

#[test]
fn server_without_addresses_has_none() {
    let body = server(&json!({"id": "srv", "status": "BUILD"}));
    assert_eq!(addresses_of(&body).preferred(), None);
}

#[test]
fn lost_servers_match_by_key_or_metadata() {
    let credential = CredentialRef {
        id: String::from("ofen-key-ab12"),
        name: String::from("ofen-key-ab12"),
    };
    let by_key = server(&json!({"id": "a", "key_name": "ofen-key-ab12"}));
    let by_metadata = server(&json!({"id": "b", "metadata": {"ofen-key": "ofen-key-ab12"}}));
    let stranger = server(&json!({"id": "c", "key_name": "someone-else"}));

    assert!(launched_with(&by_key, &credential));
    assert!(launched_with(&by_metadata, &credential));
    assert!(!launched_with(&stranger, &credential));
}

#[rstest]
#[case(r#"{"itemNotFound": {"message": "Instance x could not be found.", "code": 404}}"#, "Instance x could not be found.")]
#[case(r#"{"NeutronError": {"type": "Conflict", "message": "in use", "detail": ""}}"#, "in use")]
#[case("<html>Bad Gateway</html>", "<html>Bad Gateway</html>")]
fn error_messages_are_extracted(#[case] body: &str, #[case] expected: &str) {
    assert_eq!(error_message(body.as_bytes()), expected);
}

#[rstest]
#[case(404, "gone", ProviderErrorKind::NotFound)]
#[case(409, "Key pair already exists", ProviderErrorKind::Collision)]
#[case(403, "Quota exceeded for instances", ProviderErrorKind::Quota)]
#[case(413, "over limit", ProviderErrorKind::Quota)]
#[case(500, "oops", ProviderErrorKind::Other)]
fn api_errors_are_classified(
    #[case] status: u16,
    #[case] message: &str,
    #[case] expected: ProviderErrorKind,
) {
    let err = OpenStackError::Api {
        status,
        message: message.to_owned(),
    };
    assert_eq!(err.kind(), expected);
}

#[test]
fn base_image_prefers_region_entry() {
    let regional = spec(&json!({"name": "generic", "RegionOne": "regional"}), Some("RegionOne"));
    assert_eq!(base_image_reference(&regional), Some("regional"));

    let by_name = spec(&json!({"name": "generic"}), Some("RegionTwo"));
    assert_eq!(base_image_reference(&by_name), Some("generic"));
}

#[test]
fn spec_without_base_image_name_is_rejected() {
    let spec = spec(&json!({"doc-string": "nothing usable"}), None);
    assert!(matches!(
        check_openstack_spec(&spec),
        Err(OpenStackError::Spec(_))
    ));
}

#[test]
fn glance_document_flattens_to_properties() {
    let properties = image_properties(&json!({
        "id": "img",
        "name": "web-base",
        "status": "active",
        "min_disk": 10,
        "owner": "ops"
    }));
    assert!(properties.contains(&(String::from("status"), String::from("active"))));
    assert!(properties.contains(&(String::from("min_disk"), String::from("10"))));
    assert!(!properties.iter().any(|(key, _)| key == "id"));
}

#[rstest]
#[case(&[("name", "web-base")], "https://glance:9292/v2/images?name=web-base")]
#[case(
    &[("name", "web base & co+#1")],
    "https://glance:9292/v2/images?name=web+base+%26+co%2B%231"
)]
#[case(
    &[("router:external", "true")],
    "https://glance:9292/v2/images?router%3Aexternal=true"
)]
fn query_values_are_encoded(#[case] pairs: &[(&str, &str)], #[case] expected: &str) {
    let url = query_url("https://glance:9292/v2/images", pairs).expect("valid base url");
    assert_eq!(url, expected);
}

#[test]
fn allocated_floating_ip_becomes_public_address() {
    let envelope: FloatingIpEnvelope = serde_json::from_value(json!({
        "floatingip": {
            "id": "fip-1",
            "floating_ip_address": "203.0.113.40",
            "floating_network_id": "ext-net",
            "port_id": "port-9",
            "status": "DOWN"
        }
    }))
    .expect("floating ip body");

    let address = public_address_of(envelope.floatingip).expect("valid address");

    assert_eq!(address.id, "fip-1");
    assert_eq!(address.address, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 40)));
}

#[test]
fn floating_ip_with_garbled_address_is_rejected() {
    let envelope: FloatingIpEnvelope = serde_json::from_value(json!({
        "floatingip": {"id": "fip-2", "floating_ip_address": "not-an-ip"}
    }))
    .expect("floating ip body");

    let err = public_address_of(envelope.floatingip).expect_err("garbled address");

    assert!(matches!(err, OpenStackError::Transport(_)), "{err}");
}
