//! Integration tests for the discovery cascade against a mock gateway:
//! - services fetch URL, headers and refetch rules
//! - local-proto uploads
//! - methods and describe stages
//! - stale replies

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{greeter_gateway, MockGateway};
use rpcdeck::discovery::{Applied, Pipeline, Stage, StageKind};
use rpcdeck::session::Session;
use rpcdeck::view::View;
use serde_json::json;

fn fresh() -> (Pipeline, Session, View) {
    (Pipeline::new(), Session::new(), View::new())
}

// ── Services ──────────────────────────────────────────────────────

#[tokio::test]
async fn first_load_issues_one_get() {
    let gw = greeter_gateway("foo.internal:443");
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "foo.internal:443".into();

    let applied = pipeline.connect(&backend, &mut session, &mut view, false).await;
    assert_eq!(applied, Some(Applied::Ready));

    let reqs = gw.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].method, Method::GET);
    assert_eq!(
        reqs[0].path_and_query(),
        "/server/foo.internal:443/services?restart=0&md="
    );
    assert_eq!(reqs[0].use_tls.as_deref(), Some("false"));

    assert!(view.panels.service_selector);
    assert_eq!(view.services.choices().count(), 2);
    assert!(!view.spinner.is_visible());
    assert_eq!(view.connect.label(), "Get Services");
    assert_eq!(pipeline.stage(), &Stage::ServicesReady);
}

#[tokio::test]
async fn scheme_is_stripped_before_fetching() {
    let gw = greeter_gateway("foo.internal:443");
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = " grpcs://foo.internal:443 ".into();
    session.use_tls = true;
    session.metadata_field = r#"{"authorization":"Bearer abc"}"#.into();

    pipeline.connect(&backend, &mut session, &mut view, false).await;

    assert_eq!(session.target_field, "foo.internal:443");
    let reqs = gw.requests();
    assert_eq!(reqs[0].path, "/server/foo.internal:443/services");
    assert_eq!(
        reqs[0].query.as_deref(),
        Some("restart=0&md=%7B%22authorization%22:%22Bearer%20abc%22%7D")
    );
    assert_eq!(reqs[0].use_tls.as_deref(), Some("true"));
}

#[tokio::test]
async fn unchanged_target_is_not_refetched() {
    let gw = greeter_gateway("host1");
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();

    pipeline.connect(&backend, &mut session, &mut view, false).await;
    assert_eq!(pipeline.connect(&backend, &mut session, &mut view, false).await, None);
    assert_eq!(gw.request_count(), 1);

    // Restart forces a refetch and says so.
    let applied = pipeline.connect(&backend, &mut session, &mut view, true).await;
    assert_eq!(applied, Some(Applied::Ready));
    let reqs = gw.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[1].query.as_deref(), Some("restart=1&md="));
}

#[tokio::test]
async fn empty_target_sends_nothing() {
    let gw = MockGateway::new();
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "   ".into();

    assert_eq!(pipeline.connect(&backend, &mut session, &mut view, false).await, None);
    assert_eq!(gw.request_count(), 0);
    assert_eq!(pipeline.stage(), &Stage::Idle);
}

#[tokio::test]
async fn local_protos_are_uploaded_every_time() {
    let dir = tempfile::tempdir().unwrap();
    let proto = dir.path().join("greeter.proto");
    std::fs::write(&proto, "syntax = \"proto3\";\npackage proto;\n").unwrap();

    let gw = MockGateway::new();
    gw.on(
        Method::POST,
        "/server/host1/services",
        json!({ "data": ["proto.Greeter"] }),
    );
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();
    session.local_protos = vec![proto];

    assert_eq!(
        pipeline.connect(&backend, &mut session, &mut view, false).await,
        Some(Applied::Ready)
    );
    // Same target, but local-proto mode always refetches.
    assert_eq!(
        pipeline.connect(&backend, &mut session, &mut view, false).await,
        Some(Applied::Ready)
    );

    let reqs = gw.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[0].method, Method::POST);
    assert!(reqs[0]
        .content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("multipart/form-data"));
    let body = reqs[0].body_text();
    assert!(body.contains("name=\"protos\""));
    assert!(body.contains("filename=\"greeter.proto\""));
    assert!(body.contains("package proto;"));
}

#[tokio::test]
async fn services_failure_alerts_and_forgets_target() {
    let gw = MockGateway::new();
    gw.on(
        Method::GET,
        "/server/bad:1/services",
        json!({ "error": "connection refused" }),
    );
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "bad:1".into();
    session.use_tls = true;

    let applied = pipeline.connect(&backend, &mut session, &mut view, false).await;
    assert_eq!(applied, Some(Applied::Failed("connection refused".into())));
    assert_eq!(view.drain_alerts(), vec!["connection refused"]);
    assert!(!view.panels.service_selector);
    assert_eq!(session.target(), None);
    assert!(!session.use_tls);
    assert!(matches!(
        pipeline.stage(),
        Stage::Failed { stage: StageKind::Services, .. }
    ));

    // The target was forgotten, so the same target fetches again.
    pipeline.connect(&backend, &mut session, &mut view, false).await;
    assert_eq!(gw.request_count(), 2);
}

#[tokio::test]
async fn http_error_status_is_alerted() {
    let gw = MockGateway::new();
    gw.on_status(
        Method::GET,
        "/server/host1/services",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": "boom" }),
    );
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();

    pipeline.connect(&backend, &mut session, &mut view, false).await;
    let alerts = view.drain_alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("500"), "alert: {}", alerts[0]);
    assert!(alerts[0].contains("boom"), "alert: {}", alerts[0]);
}

// ── Methods and schema ────────────────────────────────────────────

#[tokio::test]
async fn full_cascade_fills_editor_with_template() {
    let gw = greeter_gateway("host1");
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();

    pipeline.connect(&backend, &mut session, &mut view, false).await;
    let applied = pipeline
        .select_service(&backend, &mut session, &mut view, "proto.Greeter")
        .await;
    assert_eq!(applied, Some(Applied::Ready));
    let labels: Vec<_> = view.methods.choices().map(|o| o.label.clone()).collect();
    assert_eq!(labels, vec!["SayHello", "SayBye"]);
    assert!(view.panels.method_selector);

    let applied = pipeline
        .select_method(&backend, &mut session, &mut view, "proto.Greeter.SayHello")
        .await;
    assert_eq!(applied, Some(Applied::Ready));
    assert_eq!(session.editor().value(), "{\n  \"name\": \"\"\n}");
    assert_eq!(
        view.schema.as_deref(),
        Some("message HelloRequest {\n  string name = 1;\n}")
    );
    assert!(view.panels.request_body);
    assert_eq!(pipeline.described_method(), Some("proto.Greeter.SayHello"));

    let paths: Vec<_> = gw.requests().iter().map(|r| r.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            "/server/host1/services",
            "/server/host1/service/proto.Greeter/functions",
            "/server/host1/function/proto.Greeter.SayHello/describe",
        ]
    );
}

#[tokio::test]
async fn placeholder_selection_sends_nothing() {
    let gw = greeter_gateway("host1");
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();
    pipeline.connect(&backend, &mut session, &mut view, false).await;

    assert_eq!(
        pipeline.select_service(&backend, &mut session, &mut view, "").await,
        None
    );
    pipeline
        .select_service(&backend, &mut session, &mut view, "proto.Greeter")
        .await;
    assert_eq!(
        pipeline.select_method(&backend, &mut session, &mut view, "").await,
        None
    );
    assert_eq!(gw.request_count(), 2);
}

#[tokio::test]
async fn describe_error_leaves_editor_alone() {
    let gw = greeter_gateway("host1");
    gw.on(
        Method::GET,
        "/server/host1/function/proto.Greeter.SayBye/describe",
        json!({ "error": "not found" }),
    );
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();
    session.editor().set_value("previous body");

    pipeline.connect(&backend, &mut session, &mut view, false).await;
    pipeline
        .select_service(&backend, &mut session, &mut view, "proto.Greeter")
        .await;
    let applied = pipeline
        .select_method(&backend, &mut session, &mut view, "proto.Greeter.SayBye")
        .await;

    assert_eq!(applied, Some(Applied::Failed("not found".into())));
    assert_eq!(view.drain_alerts(), vec!["not found"]);
    assert_eq!(session.editor().value(), "previous body");
    assert_eq!(view.schema, None);
    assert!(!view.panels.request_body);
    assert!(!view.spinner.is_visible());
}

#[tokio::test]
async fn new_target_supersedes_slow_methods_reply() {
    let gw = greeter_gateway("host1");
    gw.on_delayed(
        Method::GET,
        "/server/host1/service/proto.Greeter/functions",
        Duration::from_millis(100),
        json!({ "data": ["proto.Greeter.SayHello"] }),
    );
    gw.on(
        Method::GET,
        "/server/host2/services",
        json!({ "data": ["other.Service"] }),
    );
    let (backend, _) = gw.start().await;
    let (mut pipeline, mut session, mut view) = fresh();
    session.target_field = "host1".into();
    pipeline.connect(&backend, &mut session, &mut view, false).await;

    let slow = pipeline
        .begin_methods(&mut session, &mut view, "proto.Greeter")
        .unwrap();
    let pending = {
        let backend = backend.clone();
        let req = slow.request.clone();
        tokio::spawn(async move { backend.list_methods(&req).await })
    };

    session.target_field = "host2".into();
    assert_eq!(
        pipeline.connect(&backend, &mut session, &mut view, false).await,
        Some(Applied::Ready)
    );

    let result = pending.await.unwrap();
    assert_eq!(pipeline.finish_methods(&mut view, slow, result), Applied::Stale);
    assert!(!view.panels.method_selector);
    assert_eq!(view.methods.choices().count(), 0);
    let services: Vec<_> = view.services.choices().map(|o| o.value.clone()).collect();
    assert_eq!(services, vec!["other.Service"]);
    assert_eq!(session.target(), Some("host2"));
}
