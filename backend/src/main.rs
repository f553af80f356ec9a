mod config;
mod error;
mod preprocess;
mod routes;
mod soil_model;
mod waste_model;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use config::AppConfig;
use routes::{AppState, configure_routes};
use soil_model::SoilModel;
use std::sync::Arc;
use waste_model::WasteModel;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(fatal)?;
    log::info!(
        "waste model: {}, soil model dir: {}",
        config.waste_model_path.display(),
        config.soil_model_dir.display()
    );

    // Fail-fast startup: both models must load or the process aborts.
    let waste = WasteModel::load(&config.waste_model_path).map_err(fatal)?;
    let soil = SoilModel::load(&config.soil_model_dir).map_err(fatal)?;
    let state = web::Data::new(AppState {
        waste: Arc::new(waste),
        soil: Arc::new(soil),
    });

    log::info!("Starting server on {}", config.bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&config.bind_address)?
    .run()
    .await
}

fn fatal(error: error::StartupError) -> std::io::Error {
    log::error!("startup failed: {error}");
    std::io::Error::new(std::io::ErrorKind::Other, error.to_string())
}
