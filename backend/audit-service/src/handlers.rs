//! HTTP boundary: translates requests into [`QueryService`] calls

use actix_web::{get, post, web, HttpResponse};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::error::Result;
use crate::query::QueryService;

#[derive(Debug, Deserialize)]
pub struct RefNoCountRequest {
    #[serde(rename = "refNo")]
    pub ref_no: String,
    /// ISO-8601; entries with `date >= till` are counted
    pub till: String,
}

#[get("/audit")]
async fn audit_logs(query: web::Data<QueryService>) -> Result<HttpResponse> {
    let entries = query.audit_logs(None, None).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[get("/audit/{page}")]
async fn audit_logs_page(
    query: web::Data<QueryService>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let entries = query.audit_logs(Some(path.into_inner()), None).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[get("/audit/{page}/{limit}")]
async fn audit_logs_page_limit(
    query: web::Data<QueryService>,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse> {
    let (page, limit) = path.into_inner();
    let entries = query.audit_logs(Some(page), Some(limit)).await?;
    Ok(HttpResponse::Ok().json(entries))
}

#[post("/ref-no-count")]
async fn ref_no_count(
    query: web::Data<QueryService>,
    body: web::Json<RefNoCountRequest>,
) -> Result<HttpResponse> {
    let count = query.ref_no_count_till(&body.ref_no, &body.till).await?;
    Ok(HttpResponse::Ok().json(count))
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[get("/metrics")]
async fn metrics(registry: web::Data<Registry>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().body(e.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Mount all routes; expects `web::Data<QueryService>` and `web::Data<Registry>`
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(metrics).service(
        web::scope("/v1")
            .service(audit_logs)
            .service(audit_logs_page_limit)
            .service(audit_logs_page)
            .service(ref_no_count),
    );
}
