use crate::model::UserContext;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};

/// Axum extractor binding the caller identity to the request.
///
/// Looks for:
/// - X-User-Id: user identifier
/// - X-User-Email: optional email
/// - X-User-Name: optional display name
///
/// Absent headers fall back to the process default user, so unauthenticated
/// development setups keep working.
#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        if let Some(user_id) = extract_header_value(headers, "x-user-id") {
            let user_email = extract_header_value(headers, "x-user-email");
            let user_name = extract_header_value(headers, "x-user-name");
            Ok(UserContext::with_details(user_id, user_email, user_name))
        } else {
            Ok(UserContext::default_user())
        }
    }
}

fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    #[test]
    fn header_values_extract() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_static("jane"),
        );
        assert_eq!(extract_header_value(&headers, "x-user-id"), Some("jane".to_string()));
        assert_eq!(extract_header_value(&headers, "x-user-email"), None);
    }
}
