mod common;

use std::time::Duration;

use common::{Harness, PAYMENTS_TOKEN, Reply};
use conduit_api::TransportError;
use conduit_audit::{AuditStore, RecordFilter};
use conduit_engine::{Catalog, DispatchRequest, GatewayError};
use conduit_types::{DispatchStage, ErrorKind, Outcome, Subject};
use conduit_util::StaticSecretStore;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const HMAC_OF_A_1_WITH_K: &str = "c3a92ff9e274cdcce27a58c15a78ec6dcbbdbd0038a87e7a11baef2028fd8bff";

fn charge(model: serde_json::Value) -> DispatchRequest {
    DispatchRequest::new("payments", "charge", model)
}

#[tokio::test]
async fn amount_is_mapped_to_cents_and_response_is_normalized() {
    let harness = Harness::new([Reply::json(200, r#"{"id": "ch_1", "status": "succeeded"}"#)]);
    let result = harness
        .pipeline
        .dispatch(charge(json!({"amount": 2.5, "currency": "eur", "order_id": "ord_1"})))
        .await
        .expect("dispatch");

    assert!(result.success);
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.status, Some(200));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.response, Some(json!({"charge_id": "ch_1", "paid": true})));
    assert_eq!(result.raw_body, Some(json!({"id": "ch_1", "status": "succeeded"})));

    let sent = harness.transport.last_request();
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.url, "https://api.payments.test/v1/charges");
    assert_eq!(sent.timeout, Some(Duration::from_millis(1000)));
    assert_eq!(
        sent.body,
        Some(json!({
            "amount_cents": 250,
            "currency": "EUR",
            "source": {"card_number": null},
            "metadata": {"account": "acct_42"}
        }))
    );
    assert_eq!(sent.header("Authorization"), Some(format!("Bearer {PAYMENTS_TOKEN}").as_str()));
    assert_eq!(sent.header("Idempotency-Key"), Some("ord_1"));
    assert_eq!(sent.header("X-Client"), Some("conduit"));

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.outcome, Outcome::Success);
    assert_eq!(record.environment, "sandbox");
    assert_eq!(record.request.headers["Authorization"], "[MASKED]");
    assert_eq!(record.response.as_ref().map(|response| response.status), Some(200));
    assert_eq!(record.inputs.model, Some(json!({"amount": 2.5, "currency": "eur", "order_id": "ord_1"})));
}

#[tokio::test]
async fn missing_required_field_is_recorded_without_a_network_call() {
    let harness = Harness::idle();
    let result = harness
        .pipeline
        .dispatch(DispatchRequest::new("payments", "signup", json!({"name": " Ada "})))
        .await
        .expect("dispatch");

    assert!(!result.success);
    assert_eq!(result.outcome, Outcome::Error);
    let error = result.error.as_ref().expect("error reported");
    assert_eq!(error.kind, ErrorKind::Mapping);
    assert_eq!(error.stage, DispatchStage::BuildingPayload);
    assert_eq!(error.field.as_deref(), Some("email"));
    assert!(error.message.contains("required value missing"));
    assert!(harness.transport.requests().is_empty());

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.outcome, Outcome::Error);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.status, None);
}

#[tokio::test]
async fn hmac_signature_covers_the_canonical_body() {
    let harness = Harness::new([Reply::json(202, "")]);
    let result = harness
        .pipeline
        .dispatch(DispatchRequest::new("acme", "notify", json!({})))
        .await
        .expect("dispatch");

    assert!(result.success);
    let sent = harness.transport.last_request();
    assert_eq!(sent.body, Some(json!({"a": 1})));
    assert_eq!(sent.header("X-Signature"), Some(HMAC_OF_A_1_WITH_K));

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.request.headers["X-Signature"], "[MASKED]");
}

#[tokio::test]
async fn vendor_errors_are_reported_and_not_retried() {
    let harness = Harness::new([Reply::json(500, r#"{"error": "boom"}"#)]);
    let result = harness.pipeline.dispatch(charge(json!({"amount": 10}))).await.expect("dispatch");

    assert!(!result.success);
    assert_eq!(result.outcome, Outcome::Fail);
    assert_eq!(result.status, Some(500));
    assert_eq!(result.error_kind(), Some(ErrorKind::Vendor));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.raw_body, Some(json!({"error": "boom"})));
    assert_eq!(result.response, None);
    assert_eq!(harness.transport.requests().len(), 1);

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.outcome, Outcome::Fail);
    assert_eq!(record.response.and_then(|response| response.body), Some(json!({"error": "boom"})));
}

#[tokio::test(start_paused = true)]
async fn timeout_then_success_produces_one_record() {
    let harness = Harness::new([Reply::Hang, Reply::json(200, r#"{"id": "ch_2", "status": "succeeded"}"#)]);
    let result = harness.pipeline.dispatch(charge(json!({"amount": 1}))).await.expect("dispatch");

    assert!(result.success);
    assert_eq!(result.attempts, 2);
    assert_eq!(harness.transport.requests().len(), 2);
    assert_eq!(harness.audit.len().await, 1);

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.attempts, 2);
    assert_eq!(record.outcome, Outcome::Success);
    assert!(record.latency_ms >= 1100, "latency {} should include timeout and backoff", record.latency_ms);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_the_transport_error() {
    let harness = Harness::new([
        Reply::Fail(TransportError::Connect("refused".into())),
        Reply::Fail(TransportError::Connect("refused".into())),
        Reply::Fail(TransportError::Connect("refused".into())),
    ]);
    let result = harness.pipeline.dispatch(charge(json!({"amount": 1}))).await.expect("dispatch");

    assert_eq!(result.outcome, Outcome::Error);
    assert_eq!(result.error_kind(), Some(ErrorKind::Transport));
    assert_eq!(result.attempts, 3);
    assert_eq!(result.status, None);
    assert_eq!(harness.audit.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_still_persists_a_record() {
    let harness = Harness::new([Reply::Hang]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = harness
        .pipeline
        .dispatch_with_cancel(charge(json!({"amount": 1})), cancel)
        .await
        .expect("dispatch");

    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(result.error.as_ref().map(|error| error.stage), Some(DispatchStage::Sending));
    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.outcome, Outcome::Error);
}

#[tokio::test]
async fn unknown_or_disabled_configuration_is_not_recorded() {
    let harness = Harness::idle();
    let cases = [
        ("nobody", "charge", "unknown provider"),
        ("payments", "nothing", "unknown endpoint"),
        ("payments", "legacy", "disabled"),
        ("retired", "ping", "disabled"),
    ];
    for (provider, endpoint, expected) in cases {
        let error = harness
            .pipeline
            .dispatch(DispatchRequest::new(provider, endpoint, json!({})))
            .await
            .expect_err("configuration should not resolve");
        match error {
            GatewayError::ConfigNotFound { reason, .. } => assert_eq!(reason, expected, "{provider}/{endpoint}"),
            other => panic!("unexpected error: {other}"),
        }
    }
    assert!(harness.audit.is_empty().await);
    assert!(harness.transport.requests().is_empty());
}

#[tokio::test]
async fn missing_secret_fails_signing() {
    let harness = Harness::with_secrets(Vec::<Reply>::new(), StaticSecretStore::new());
    let result = harness.pipeline.dispatch(charge(json!({"amount": 3}))).await.expect("dispatch");

    let error = result.error.expect("error reported");
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.stage, DispatchStage::Signing);
    assert_eq!(error.field.as_deref(), Some("api_token"));
    assert!(harness.transport.requests().is_empty());
}

#[tokio::test]
async fn query_methods_send_payload_as_query_parameters() {
    let harness = Harness::new([Reply::json(200, r#"{"id": "re 1"}"#)]);
    let result = harness
        .pipeline
        .dispatch(DispatchRequest::new(
            "payments",
            "refund",
            json!({"refund_id": "re 1", "expand": ["charge", "customer"]}),
        ))
        .await
        .expect("dispatch");

    assert!(result.success);
    let sent = harness.transport.last_request();
    assert_eq!(sent.method, "GET");
    assert_eq!(sent.url, "https://api.payments.test/v1/refunds/re%201");
    assert_eq!(
        sent.query,
        vec![
            ("expand".to_string(), "charge".to_string()),
            ("expand".to_string(), "customer".to_string())
        ]
    );
    assert_eq!(sent.body, None);

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    assert_eq!(record.request.body, Some(json!({"expand": ["charge", "customer"]})));
}

#[tokio::test]
async fn missing_path_parameter_is_a_mapping_error() {
    let harness = Harness::idle();
    let result = harness
        .pipeline
        .dispatch(DispatchRequest::new("payments", "refund", json!({})))
        .await
        .expect("dispatch");

    let error = result.error.expect("error reported");
    assert_eq!(error.kind, ErrorKind::Mapping);
    assert_eq!(error.field.as_deref(), Some("path.refund_id"));
}

#[tokio::test]
async fn runtime_expression_errors_name_the_target() {
    let harness = Harness::idle();
    let result = harness
        .pipeline
        .dispatch(charge(json!({"amount": "lots"})))
        .await
        .expect("dispatch");

    let error = result.error.expect("error reported");
    assert_eq!(error.kind, ErrorKind::ExpressionRuntime);
    assert_eq!(error.field.as_deref(), Some("amount_cents"));
}

#[tokio::test]
async fn secrets_and_sensitive_fields_never_reach_the_record() {
    let harness = Harness::new([Reply::json(
        200,
        &format!(r#"{{"id": "ch_3", "echo": "{PAYMENTS_TOKEN}", "card_number": "4242424242424242"}}"#),
    )]);
    let result = harness
        .pipeline
        .dispatch(charge(json!({"amount": 5, "card_number": "4242424242424242"})))
        .await
        .expect("dispatch");
    assert!(result.success);

    let record = harness.audit.find(result.record_id).await.expect("record persisted");
    let persisted = serde_json::to_string(&record).expect("serialize record");
    assert!(!persisted.contains(PAYMENTS_TOKEN));
    assert!(!persisted.contains("4242424242424242"));
    assert_eq!(record.request.body.as_ref().unwrap()["source"]["card_number"], "[MASKED]");
    assert!(record.inputs.model.is_none());
    assert!(record.inputs.payload.is_none());

    // The caller still sees the vendor body as received.
    assert_eq!(result.raw_body.unwrap()["echo"], PAYMENTS_TOKEN);
}

#[tokio::test]
async fn identical_input_builds_identical_requests() {
    let harness = Harness::idle();
    let model = json!({"amount": 19.99, "currency": "gbp", "order_id": "ord_9"});
    harness.pipeline.dispatch(charge(model.clone())).await.expect("first dispatch");
    harness.pipeline.dispatch(charge(model)).await.expect("second dispatch");

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        serde_json::to_vec(&requests[0].body).unwrap(),
        serde_json::to_vec(&requests[1].body).unwrap()
    );
    assert_eq!(requests[0].headers, requests[1].headers);
}

#[tokio::test]
async fn subject_is_recorded_and_filterable() {
    let harness = Harness::idle();
    let subject = Subject::new("order", "ord_7");
    harness
        .pipeline
        .dispatch(charge(json!({"amount": 1})).with_subject(subject.clone()))
        .await
        .expect("dispatch with subject");
    harness.pipeline.dispatch(charge(json!({"amount": 2}))).await.expect("dispatch");

    let records: Vec<_> = harness.audit.list(RecordFilter::new().subject(subject.clone())).collect().await;
    assert_eq!(records.len(), 1);
    let record = records.into_iter().next().unwrap().expect("record");
    assert_eq!(record.subject, Some(subject));
}

#[tokio::test]
async fn catalog_replacement_applies_to_later_dispatches() {
    let harness = Harness::idle();
    harness.catalog.replace(Catalog::default());
    let error = harness
        .pipeline
        .dispatch(charge(json!({"amount": 1})))
        .await
        .expect_err("catalog was emptied");
    assert!(matches!(error, GatewayError::ConfigNotFound { .. }));

    harness.catalog.reload(&common::catalog_document()).expect("reload");
    let result = harness.pipeline.dispatch(charge(json!({"amount": 1}))).await.expect("dispatch");
    assert!(result.success);
}

#[tokio::test]
async fn repeated_append_rules_each_add_an_element() {
    let harness = Harness::new([Reply::json(200, "{}")]);
    let result = harness
        .pipeline
        .dispatch(DispatchRequest::new(
            "payments",
            "label",
            json!({"primary": "vip", "secondary": "EARLY"}),
        ))
        .await
        .expect("dispatch");

    assert!(result.success);
    assert_eq!(harness.transport.last_request().body, Some(json!({"tags": ["vip", "early"]})));
}
