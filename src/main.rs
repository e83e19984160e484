use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::Arc;

use taskguard::{
    auth::AuthMiddleware,
    clock::SystemClock,
    config::Config,
    rate_limit::RateLimit,
    routes::{self, health},
    state::AppState,
    store::{MemoryUserStore, PgUserStore},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("auth settings: {:?}", config.auth);

    let clock = Arc::new(SystemClock);
    let state = match &config.database_url {
        Some(url) => {
            let store = PgUserStore::connect(url)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            store
                .ensure_schema()
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            AppState::new(&config.auth, Arc::new(store), clock)
        }
        None => {
            log::warn!("DATABASE_URL not set, accounts are kept in memory and lost on restart");
            AppState::new(&config.auth, Arc::new(MemoryUserStore::new()), clock)
        }
    };
    let state = match state {
        Ok(state) => state,
        Err(e) => {
            log::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Starting TaskGuard server at {}", config.server_url());
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(RateLimit::new(state.throttle.clone()))
            .wrap(Logger::default())
            .service(health::health)
            .service(
                web::scope("/api")
                    .wrap(AuthMiddleware::new(state.authenticator.clone()))
                    .configure(routes::config),
            )
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await
}
