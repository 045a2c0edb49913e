use actix_web::web::Data;
use actix_web::{HttpResponse, get};
use serde_json::json;
use sqlx::{Pool, Postgres};

use crate::storage::kvb::KvbClient;

#[get("/health/liveness")]
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "alive" }))
}

/// Readiness requires both the database and the key-value bus.
#[get("/health/readiness")]
pub async fn readiness(pool: Data<Pool<Postgres>>, kvb: Data<KvbClient>) -> HttpResponse {
    let database_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool.get_ref())
        .await
        .is_ok();
    let bus_ok = kvb.health_check().await;

    let body = json!({
        "status": if database_ok && bus_ok { "ready" } else { "not ready" },
        "database": database_ok,
        "kvb": bus_ok,
    });

    if database_ok && bus_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
