pub mod error;
pub mod images;

use std::net::IpAddr;

use rocket::{Build, Rocket};

pub use self::error::ApiError;

use self::images::AllowedAddresses;

/// Which optional routes are served.
#[derive(Debug, Clone, Default)]
pub struct ApiOptions {
    pub enable_delete: bool,
    pub enable_upload: bool,
    /// `/display/<sig>/<op>/<w>x<h>/<path>` and friends. They read from the
    /// source storage.
    pub enable_path_routes: bool,
    /// Clients allowed to delete and upload. Empty allows all.
    pub allowed_ip_addresses: Vec<IpAddr>,
}

/// Mounts the image routes. Writing to the source storage is opt-in.
pub fn mount(rocket: Rocket<Build>, options: ApiOptions) -> Rocket<Build> {
    let mut rocket = rocket.manage(AllowedAddresses(options.allowed_ip_addresses)).mount(
        "/",
        routes![
            images::display,
            images::descriptor,
            images::redirect,
            images::healthcheck,
        ],
    );

    if options.enable_path_routes {
        rocket = rocket.mount(
            "/",
            routes![images::display_path, images::descriptor_path, images::redirect_path],
        );
    }

    if options.enable_delete {
        rocket = rocket.mount("/", routes![images::delete_source]);
    }

    if options.enable_upload {
        rocket = rocket.mount("/", routes![images::upload]);
    }

    rocket
}
