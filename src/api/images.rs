use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::{ContentType, Header, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::{self, Redirect, Responder, Response};
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use tokio::io::AsyncReadExt;

use crate::api::ApiError;
use crate::models::ImageDescriptor;
use crate::parameters::parse_path_parameters;
use crate::processor::{ProcessError, ProcessOptions, Processor, UploadedFile};

const FORCE_PARAM_NAME: &str = "force";

/// Raw `If-Modified-Since` request header.
pub struct IfModifiedSince(Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for IfModifiedSince {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(IfModifiedSince(
            request.headers().get_one("If-Modified-Since").map(str::to_string),
        ))
    }
}

/// Client addresses allowed to modify source files. Empty allows everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowedAddresses(pub Vec<IpAddr>);

/// Guard for the routes writing to the source storage.
pub struct TrustedClient;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TrustedClient {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let allowed = match request.rocket().state::<AllowedAddresses>() {
            Some(AllowedAddresses(allowed)) if !allowed.is_empty() => allowed,
            _ => return Outcome::Success(TrustedClient),
        };

        match request.client_ip() {
            Some(ip) if allowed.contains(&ip) => Outcome::Success(TrustedClient),
            ip => {
                log::warn!("Rejected {} {} from {:?}", request.method(), request.uri(), ip);
                Outcome::Error((Status::Forbidden, ()))
            }
        }
    }
}

/// Splits the `force` flag, which never takes part in the key, from the
/// image parameters.
fn process_options(params: &mut HashMap<String, String>, if_modified_since: IfModifiedSince) -> ProcessOptions {
    let force = params
        .remove(FORCE_PARAM_NAME)
        .map(|value| matches!(value.as_str(), "1" | "true" | "True" | "TRUE"))
        .unwrap_or(false);

    ProcessOptions {
        force,
        if_modified_since: if_modified_since.0,
    }
}

/// Merges `sig/op/WxH/path` segments with the query string, the query winning.
fn path_parameters(parameters: &Path, query: HashMap<String, String>) -> Result<HashMap<String, String>, ApiError> {
    let raw = parameters.to_string_lossy();

    let mut params = parse_path_parameters(&raw)
        .ok_or_else(|| ProcessError::Unprocessable(format!("Invalid parameters {}", raw)))?;
    params.extend(query);

    Ok(params)
}

// Responder for image data
pub struct ImageResponse {
    pub data: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

impl<'r> Responder<'r, 'static> for ImageResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let content_type = self
            .headers
            .get("Content-Type")
            .and_then(|value| ContentType::parse_flexible(value))
            .unwrap_or(ContentType::JPEG);

        let mut response = Response::build();
        response.header(content_type);
        for (name, value) in self.headers {
            if name != "Content-Type" {
                response.header(Header::new(name, value));
            }
        }

        response
            .header(Header::new("Cache-Control", "public, max-age=86400"))
            .sized_body(None, Cursor::new(self.data))
            .ok()
    }
}

async fn render(
    mut params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &Processor,
) -> Result<ImageResponse, ApiError> {
    let options = process_options(&mut params, if_modified_since);

    let descriptor = processor.process(&params, &options).await?;
    let data = processor.load(&descriptor).await?;

    Ok(ImageResponse {
        data,
        headers: descriptor.headers,
    })
}

async fn describe(
    mut params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &Processor,
) -> Result<Json<ImageDescriptor>, ApiError> {
    let options = process_options(&mut params, if_modified_since);

    let descriptor = processor.process(&params, &options).await?;

    Ok(Json(descriptor))
}

async fn redirect_to(
    mut params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &Processor,
) -> Result<Redirect, ApiError> {
    let options = process_options(&mut params, if_modified_since);

    let descriptor = processor.process(&params, &options).await?;
    if descriptor.url.is_empty() {
        return Err(ApiError::MissingBaseUrl);
    }

    // 303 See Other
    Ok(Redirect::to(descriptor.url))
}

#[get("/display?<params..>")]
pub async fn display(
    params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &State<Processor>,
) -> Result<ImageResponse, ApiError> {
    render(params, if_modified_since, processor).await
}

#[get("/display/<parameters..>?<params..>", rank = 2)]
pub async fn display_path(
    parameters: PathBuf,
    params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &State<Processor>,
) -> Result<ImageResponse, ApiError> {
    render(path_parameters(&parameters, params)?, if_modified_since, processor).await
}

#[get("/get?<params..>")]
pub async fn descriptor(
    params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &State<Processor>,
) -> Result<Json<ImageDescriptor>, ApiError> {
    describe(params, if_modified_since, processor).await
}

#[get("/get/<parameters..>?<params..>", rank = 2)]
pub async fn descriptor_path(
    parameters: PathBuf,
    params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &State<Processor>,
) -> Result<Json<ImageDescriptor>, ApiError> {
    describe(path_parameters(&parameters, params)?, if_modified_since, processor).await
}

#[get("/redirect?<params..>")]
pub async fn redirect(
    params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &State<Processor>,
) -> Result<Redirect, ApiError> {
    redirect_to(params, if_modified_since, processor).await
}

#[get("/redirect/<parameters..>?<params..>", rank = 2)]
pub async fn redirect_path(
    parameters: PathBuf,
    params: HashMap<String, String>,
    if_modified_since: IfModifiedSince,
    processor: &State<Processor>,
) -> Result<Redirect, ApiError> {
    redirect_to(path_parameters(&parameters, params)?, if_modified_since, processor).await
}

#[derive(FromForm)]
pub struct Upload<'r> {
    data: TempFile<'r>,
}

#[post("/upload", data = "<form>")]
pub async fn upload(
    _client: TrustedClient,
    form: Form<Upload<'_>>,
    processor: &State<Processor>,
) -> Result<Json<UploadedFile>, ApiError> {
    let filename = form
        .data
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();

    let mut content = Vec::with_capacity(form.data.len() as usize);
    let reader = form
        .data
        .open()
        .await
        .map_err(|e| ProcessError::Backend(format!("Unable to read upload {}: {}", filename, e)))?;
    Box::pin(reader)
        .read_to_end(&mut content)
        .await
        .map_err(|e| ProcessError::Backend(format!("Unable to read upload {}: {}", filename, e)))?;

    // Processor::upload keeps only the final path component
    let uploaded = processor.upload(&filename, &content).await?;

    Ok(Json(uploaded))
}

#[delete("/<path..>")]
pub async fn delete_source(
    _client: TrustedClient,
    path: PathBuf,
    processor: &State<Processor>,
) -> Result<Status, ApiError> {
    let path = path.to_string_lossy();

    log::info!("Deleting source file {}", path);
    processor.delete(&path).await?;

    Ok(Status::Ok)
}

#[get("/healthcheck")]
pub fn healthcheck() -> Json<Value> {
    Json(json!({
        "status": "Ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
