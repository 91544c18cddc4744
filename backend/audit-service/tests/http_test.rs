//! Read API over the in-memory store

mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use audit_service::handlers;
use audit_service::query::QueryService;
use common::*;
use serde_json::{json, Value};

async fn seeded(count: i64) -> Harness {
    let h = Harness::new();
    for offset in 0..count {
        let minute = 50 + offset;
        let date = format!("2024-03-01T10:{:02}:00", minute % 60);
        h.writer
            .write(&audit_msg(0, offset, "TXN-42", &date))
            .await
            .unwrap();
    }
    h
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(QueryService::new($h.store.clone())))
                .app_data(web::Data::new($h.registry.clone()))
                .configure(handlers::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_audit_routes_apply_defaults_and_paging() {
    let h = seeded(8).await;
    let app = app!(h);

    let req = test::TestRequest::get().uri("/v1/audit").to_request();
    let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.len(), 5);
    assert_eq!(body[0]["id"], 8);
    assert_eq!(body[0]["refNo"], "TXN-42");
    assert_eq!(body[0]["payload"]["endpoint"], "/v1/payments");
    assert!(body[0].get("dedupeKey").is_none());

    let req = test::TestRequest::get().uri("/v1/audit/1").to_request();
    let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.len(), 3);
    assert_eq!(body[0]["id"], 3);

    let req = test::TestRequest::get().uri("/v1/audit/0/2").to_request();
    let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.iter().map(|e| e["id"].clone()).collect::<Vec<_>>(), vec![json!(8), json!(7)]);

    let req = test::TestRequest::get().uri("/v1/audit/0/0").to_request();
    let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert!(body.is_empty());
}

#[actix_web::test]
async fn test_negative_page_is_bad_request() {
    let h = seeded(1).await;
    let app = app!(h);

    let req = test::TestRequest::get().uri("/v1/audit/-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 400);
    assert!(body["error"].as_str().unwrap().contains("page"));
}

#[actix_web::test]
async fn test_ref_no_count() {
    let h = seeded(5).await;
    let app = app!(h);

    // Entries at 10:50 .. 10:54
    let req = test::TestRequest::post()
        .uri("/v1/ref-no-count")
        .set_json(json!({ "refNo": "TXN-42", "till": "2024-03-01T10:52:00" }))
        .to_request();
    let count: i64 = test::call_and_read_body_json(&app, req).await;
    assert_eq!(count, 3);

    let req = test::TestRequest::post()
        .uri("/v1/ref-no-count")
        .set_json(json!({ "refNo": "TXN-42", "till": "2099-01-01T00:00:00Z" }))
        .to_request();
    let count: i64 = test::call_and_read_body_json(&app, req).await;
    assert_eq!(count, 0);

    let req = test::TestRequest::post()
        .uri("/v1/ref-no-count")
        .set_json(json!({ "refNo": "TXN-42", "till": "not a date" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_store_outage_is_service_unavailable() {
    let h = seeded(2).await;
    h.store.set_available(false);
    let app = app!(h);

    let req = test::TestRequest::get().uri("/v1/audit").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 503);
}

#[actix_web::test]
async fn test_health_and_metrics() {
    let h = seeded(2).await;
    let app = app!(h);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("audit_entries_inserted_total 2"));
}
