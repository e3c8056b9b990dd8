use actix_web::{get, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use log::{error, info};
use manga_aggregator::app_state::AppState;
use manga_aggregator::config::Config;
use manga_aggregator::error::ApiError;
use manga_aggregator::service::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default)]
    nocache: bool,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

/// Peer IP is the rate-limit key
fn client_key(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            let status = actix_web::http::StatusCode::from_u16(e.status)
                .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
            HttpResponse::build(status).json(serde_json::json!({
                "success": false,
                "error": e,
            }))
        }
    }
}

#[get("/api/search")]
async fn search(req: HttpRequest, data: web::Data<AppState>, query: web::Query<SearchQuery>) -> impl Responder {
    respond(data.service.search(&client_key(&req), &query.q, query.nocache).await)
}

#[get("/api/titles/{title}/chapters")]
async fn chapters(
    req: HttpRequest,
    data: web::Data<AppState>,
    title: web::Path<String>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    respond(data.service.chapters(&client_key(&req), &title, page, limit).await)
}

#[get("/api/titles/{title}/chapters/{chapter}/images")]
async fn chapter_images(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (title, chapter) = path.into_inner();
    respond(
        data.service
            .chapter_images(&client_key(&req), &title, &chapter)
            .await,
    )
}

#[get("/api/metrics")]
async fn metrics(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "sources": data.service.metrics(),
        "queue": data.service.queue_stats(),
    }))
}

#[get("/api/health")]
async fn health(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.service.health())
}

fn init_logging() {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        use log4rs::append::console::ConsoleAppender;
        use log4rs::config::{Appender, Root};
        use log4rs::encode::pattern::PatternEncoder;

        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
            .build();
        let fallback = log4rs::config::Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(log::LevelFilter::Info));
        if let Ok(config) = fallback {
            let _ = log4rs::init_config(config);
        }
        log::warn!("log4rs.yml not loaded ({}), logging to console", e);
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let cfg = Config::load();
    let addr = cfg.bind_addr.clone();
    info!(
        "Scraping: {} sources/batch, {} concurrent scrapes, queue {}, browser {}",
        cfg.scraping.concurrent_sources,
        cfg.scraping.max_concurrent_scrapes,
        cfg.scraping.max_queue_size,
        if cfg.scraping.use_browser { "on" } else { "off" }
    );

    let state = match AppState::build(cfg) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };
    state.warm_up().await;

    let housekeeping = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
            loop {
                ticker.tick().await;
                state.service.housekeeping();
            }
        })
    };

    let data = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(search)
            .service(chapters)
            .service(chapter_images)
            .service(metrics)
            .service(health)
    })
    .bind(&addr)?;

    info!("Listening on {}", addr);
    // Resolves after SIGINT/SIGTERM once in-flight requests drain
    let result = server.run().await;

    housekeeping.abort();
    state.pool.stop().await;
    info!("Browser pool stopped, bye");
    result
}
