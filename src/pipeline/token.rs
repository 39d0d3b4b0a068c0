//! Access token resolution

use super::{GatewayRequest, Next, Stage, StageResult};
use crate::error::GatewayError;
use async_trait::async_trait;
use hyper::header::{AUTHORIZATION, COOKIE};

/// Query parameter carrying the token
const TOKEN_QUERY_PARAM: &str = "aut";

/// Cookie carrying the token
const TOKEN_COOKIE: &str = "s";

/// Find the access token: `Authorization` header (second word), then the
/// `aut` query parameter, then the `s` cookie.
pub fn extract_access_token(request: &GatewayRequest) -> Option<String> {
    if let Some(auth) = request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.split_whitespace().nth(1) {
            return Some(token.to_string());
        }
    }

    if let Some(token) = request.query(TOKEN_QUERY_PARAM).filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    request
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.split_once('='))
        .find(|(name, _)| name.trim() == TOKEN_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Rejects requests without a token with 401
#[derive(Debug, Default)]
pub struct AccessTokenResolver;

#[async_trait]
impl Stage for AccessTokenResolver {
    fn name(&self) -> &'static str {
        "access_token_resolver"
    }

    async fn handle(&self, mut request: GatewayRequest, next: Next<'_>) -> StageResult {
        let token = extract_access_token(&request)
            .ok_or_else(|| GatewayError::Unauthorized("Unauthorized.".into()))?;
        request.access_token = Some(token);
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    fn request() -> GatewayRequest {
        GatewayRequest::new(Method::GET, "/v2/gateway_metadata/abc")
    }

    #[test]
    fn test_authorization_header() {
        let req = request().with_header("authorization", "Bearer abc123");
        assert_eq!(extract_access_token(&req).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_authorization_without_token_falls_through() {
        let req = request()
            .with_header("authorization", "Bearer")
            .with_query("aut", "from-query");
        assert_eq!(extract_access_token(&req).as_deref(), Some("from-query"));
    }

    #[test]
    fn test_header_wins_over_query_and_cookie() {
        let req = request()
            .with_header("authorization", "Bearer header")
            .with_header("cookie", "s=cookie")
            .with_query("aut", "query");
        assert_eq!(extract_access_token(&req).as_deref(), Some("header"));
    }

    #[test]
    fn test_cookie() {
        let req = request().with_header("cookie", "theme=dark; s=cookie-token ; lang=en");
        assert_eq!(extract_access_token(&req).as_deref(), Some("cookie-token"));
    }

    #[test]
    fn test_missing_token() {
        let req = request().with_header("cookie", "session=x");
        assert!(extract_access_token(&req).is_none());
    }
}
