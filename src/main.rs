use std::sync::Arc;

use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use rocket::fairing::AdHoc;

use pixfit::api;
use pixfit::config::{self, AppConfig};
use pixfit::cors::CORS;
use pixfit::engine::ImageEngine;
use pixfit::kvstore::new_kvstore;
use pixfit::processor::Processor;
use pixfit::storage::{new_storages, HttpClient};

#[rocket::launch]
async fn rocket() -> _ {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let figment = config::figment();
    let config = figment.extract::<AppConfig>().expect("Invalid configuration");
    info!("Configuration loaded successfully");

    let processor_config = config.processor_config().expect("Invalid options");
    let api_options = config.api_options().expect("Invalid options");
    if processor_config.secret_key.is_none() {
        info!("No secret key configured, request signing disabled");
    }

    let client = HttpClient::new(config.timeout, &config.user_agent).expect("Unable to create HTTP client");

    let kvstore = new_kvstore(config.kvstore.as_ref()).expect("Unable to create kvstore");
    let (source, destination) =
        new_storages(config.storage.as_ref(), &client).expect("Unable to create storages");

    let processor = Processor::new(
        processor_config,
        kvstore,
        source,
        destination,
        Arc::new(ImageEngine),
        client,
    );

    info!("Starting pixfit server on {}:{}", config.address, config.port);

    let mut rocket = rocket::custom(figment)
        .manage(processor)
        .attach(AdHoc::on_shutdown("Close kvstore", |rocket| {
            Box::pin(async move {
                if let Some(processor) = rocket.state::<Processor>() {
                    if let Err(e) = processor.close().await {
                        error!("Unable to close kvstore: {}", e);
                    }
                }
            })
        }));

    if config.cors_enabled() {
        rocket = rocket.attach(CORS::new(
            config.allowed_origins.clone().unwrap_or_default(),
            config.allowed_methods.clone().unwrap_or_default(),
            config.allowed_headers.clone().unwrap_or_default(),
        ));
    }

    api::mount(rocket, api_options)
}
