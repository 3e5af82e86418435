//! Contract tests for the webhook ingress building blocks: filter language,
//! authentication and template rendering.

use hmac::{Hmac, Mac};
use kubetask_controller::crds::HmacAlgorithm;
use kubetask_controller::webhook::{auth, filter, render};
use serde_json::json;
use sha2::Sha256;

fn pull_request_payload() -> serde_json::Value {
    json!({
        "body": {
            "action": "opened",
            "pull_request": {
                "number": 42,
                "title": "Add sliding-window quota",
                "draft": false,
            },
            "repository": {"full_name": "kubetask-io/kubetask"},
        },
        "headers": {
            "x-github-event": "pull_request",
            "content-type": "application/json",
        },
    })
}

#[test]
fn pr_opened_filter_matches_and_template_renders() {
    let data = pull_request_payload();

    assert!(filter::evaluate("body.action == \"opened\"", &data).unwrap());

    let description =
        render::render_template("Review PR #{{.pull_request.number}}", &data).unwrap();
    assert_eq!(description, "Review PR #42");
}

#[test]
fn pr_closed_filter_does_not_match() {
    let data = json!({"body": {"action": "closed"}, "headers": {}});
    assert!(!filter::evaluate("body.action == \"opened\"", &data).unwrap());
}

#[test]
fn compound_filters_over_body_and_headers() {
    let data = pull_request_payload();
    let expression = "headers[\"x-github-event\"] == \"pull_request\" \
                      && body.action in [\"opened\", \"synchronize\", \"reopened\"] \
                      && !body.pull_request.draft";
    assert!(filter::evaluate(expression, &data).unwrap());

    let expression = "startsWith(body.repository.full_name, \"kubetask-io/\") \
                      && has(body.pull_request)";
    assert!(filter::evaluate(expression, &data).unwrap());
}

#[test]
fn filter_compilation_errors_are_reported_not_panicked() {
    let data = pull_request_payload();
    assert!(filter::evaluate("body.action ===", &data).is_err());
    assert!(filter::evaluate("has()", &data).is_err());
    assert!(filter::evaluate("in [\"x\"]", &data).is_err());
}

#[test]
fn github_style_hmac_signature_verifies() {
    let body = br#"{"action":"opened","pull_request":{"number":42}}"#;
    let secret = "webhook-s3cret";

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    assert!(auth::verify_hmac(HmacAlgorithm::Sha256, secret, body, &signature));
    assert!(!auth::verify_hmac(
        HmacAlgorithm::Sha256,
        "other-secret",
        body,
        &signature
    ));

    let mut tampered = body.to_vec();
    tampered[0] = b' ';
    assert!(!auth::verify_hmac(
        HmacAlgorithm::Sha256,
        secret,
        &tampered,
        &signature
    ));
}

#[test]
fn templates_can_address_headers_and_nested_fields() {
    let data = pull_request_payload();
    let rendered = render::render_template(
        "[{{headers.x-github-event}}] {{body.repository.full_name}}: {{body.pull_request.title}}",
        &data,
    )
    .unwrap();
    assert_eq!(
        rendered,
        "[pull_request] kubetask-io/kubetask: Add sliding-window quota"
    );
}
