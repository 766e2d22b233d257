use rocket::http::Status;
use serde_json::json;

use crate::processor::ProcessError;

#[derive(Debug)]
pub enum ApiError {
    ProcessError(ProcessError),
    MissingBaseUrl,
}

impl From<ProcessError> for ApiError {
    fn from(error: ProcessError) -> Self {
        ApiError::ProcessError(error)
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::ProcessError(error) => Status::from_code(error.status()).unwrap_or(Status::InternalServerError),
            ApiError::MissingBaseUrl => Status::BadRequest,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ApiError::ProcessError(ProcessError::NotFound(_)) => "Not found",
            ApiError::ProcessError(ProcessError::NotModified) => "Not modified",
            ApiError::ProcessError(ProcessError::InvalidQuality) => "Invalid quality",
            ApiError::ProcessError(ProcessError::Unprocessable(_)) => "Unprocessable request",
            ApiError::ProcessError(ProcessError::Unauthorized) => "Unauthorized",
            ApiError::ProcessError(ProcessError::UpstreamFetchFailed(_)) => "Upstream fetch failed",
            ApiError::ProcessError(ProcessError::Backend(_)) => "Backend error",
            ApiError::ProcessError(ProcessError::Transform(_)) => "Image processing error",
            ApiError::MissingBaseUrl => "Redirect unavailable",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::ProcessError(error) => error.to_string(),
            ApiError::MissingBaseUrl => "Destination storage has no base URL".to_string(),
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status = self.status();

        if status == Status::NotModified {
            return rocket::Response::build().status(status).ok();
        }

        if status.code >= 500 {
            log::error!("{}: {}", self.title(), self.message());
        }

        let body = json!({
            "error": self.title(),
            "message": self.message(),
        })
        .to_string();

        rocket::Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(None, std::io::Cursor::new(body))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        let cases = [
            (ProcessError::NotFound("a.jpg".into()), Status::NotFound),
            (ProcessError::NotModified, Status::NotModified),
            (ProcessError::InvalidQuality, Status::BadRequest),
            (ProcessError::Unauthorized, Status::Unauthorized),
            (ProcessError::UpstreamFetchFailed("x".into()), Status::BadGateway),
            (ProcessError::Transform("x".into()), Status::InternalServerError),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
        assert_eq!(ApiError::MissingBaseUrl.status(), Status::BadRequest);
    }
}
