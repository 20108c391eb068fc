//! Basic usage example for the access-log middleware
//!
//! Run with:
//! ```bash
//! cargo run --example basic_usage
//! ```
//!
//! then `curl -X POST localhost:8080/abc -H 'Content-Type: application/json' -d '{"user": "admin"}'`
//! and look at `./access/example.log`.

use actix_web::{web, App, HttpResponse, HttpServer};
use accesslog_actix::{AccessLog, Config};

async fn abc(body: web::Bytes) -> HttpResponse {
    if body.is_empty() {
        return HttpResponse::BadRequest().body("empty body");
    }
    HttpResponse::Ok().json(serde_json::json!({
        "name": "peter",
        "age": 12
    }))
}

async fn health(access_log: web::Data<AccessLog>) -> HttpResponse {
    HttpResponse::Ok().json(access_log.health())
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let access_log = AccessLog::from_config(Config::with_filename("./access/example.log"))?;

    println!("Starting example server on http://0.0.0.0:8080");
    println!("  POST http://localhost:8080/abc");
    println!("  GET  http://localhost:8080/health");

    let middleware = access_log.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(middleware.clone())
            .app_data(web::Data::new(middleware.clone()))
            .service(web::resource("/abc").route(web::post().to(abc)))
            .service(web::resource("/health").route(web::get().to(health)))
    })
    .bind("0.0.0.0:8080")?
    .run()
    .await?;

    // Drain queued lines before exiting.
    access_log.flush()?;
    Ok(())
}
