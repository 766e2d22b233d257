use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Request, Response};

/// Adds CORS headers to every response.
#[derive(Debug, Clone)]
pub struct CORS {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
}

impl CORS {
    pub fn new(allowed_origins: Vec<String>, allowed_methods: Vec<String>, allowed_headers: Vec<String>) -> Self {
        Self {
            allowed_origins,
            allowed_methods,
            allowed_headers,
        }
    }

    fn allow_all(&self) -> bool {
        self.allowed_origins.len() == 1 && self.allowed_origins[0] == "*"
    }

    /// Value of `Access-Control-Allow-Origin` for a request `origin`.
    fn allowed_origin(&self, origin: Option<&str>) -> Option<String> {
        if self.allow_all() {
            return Some("*".to_string());
        }

        origin
            .filter(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
            .map(str::to_string)
    }
}

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let Some(origin) = self.allowed_origin(request.headers().get_one("Origin")) else {
            return;
        };

        response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        response.set_header(Header::new("Access-Control-Allow-Methods", self.allowed_methods.join(", ")));
        if !self.allowed_headers.is_empty() {
            response.set_header(Header::new("Access-Control-Allow-Headers", self.allowed_headers.join(", ")));
        }
        if !self.allow_all() {
            response.set_header(Header::new("Vary", "Origin"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let cors = CORS::new(strings(&["*"]), strings(&["GET"]), vec![]);

        assert_eq!(cors.allowed_origin(Some("http://a.example.com")).as_deref(), Some("*"));
        assert_eq!(cors.allowed_origin(None).as_deref(), Some("*"));
    }

    #[test]
    fn explicit_origins() {
        let cors = CORS::new(strings(&["http://a.example.com"]), strings(&["GET"]), vec![]);

        assert_eq!(
            cors.allowed_origin(Some("http://a.example.com")).as_deref(),
            Some("http://a.example.com")
        );
        assert_eq!(cors.allowed_origin(Some("http://b.example.com")), None);
        assert_eq!(cors.allowed_origin(None), None);
    }
}
