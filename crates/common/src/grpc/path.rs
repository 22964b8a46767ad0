/// Service and method parsed from a gRPC request path such as
/// `/ttn.lorawan.v3.AppAs/DownlinkQueuePush`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcPath {
    pub package: String,
    pub service: String,
    pub method: String,
}

impl RpcPath {
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        let (qualified, method) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        let (package, service) = qualified.rsplit_once('.').unwrap_or(("", qualified));
        Self {
            package: package.to_string(),
            service: service.to_string(),
            method: method.to_string(),
        }
    }

    /// `Service.Method`, the span name used for requests.
    pub fn operation(&self) -> String {
        if self.method.is_empty() {
            self.service.clone()
        } else {
            format!("{}.{}", self.service, self.method)
        }
    }
}

/// Path prefixes excluded from request logging and tracing.
pub fn default_ignored_paths() -> Vec<String> {
    vec![
        "/grpc.health.".to_string(),
        "/grpc.reflection.".to_string(),
    ]
}

pub(crate) fn is_ignored(ignored: &[String], path: &str) -> bool {
    ignored.iter().any(|prefix| path.starts_with(prefix))
}

/// Classifies the caller by the scheme of its `authorization` header.
pub(crate) fn caller_kind(headers: &http::HeaderMap) -> &'static str {
    let scheme = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_whitespace().next());
    match scheme {
        Some(s) if s.eq_ignore_ascii_case("clusterkey") => "cluster",
        Some(s) if s.eq_ignore_ascii_case("bearer") => "application",
        Some(_) => "unknown",
        None => "anonymous",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rpc_path() {
        let path = RpcPath::parse("/ttn.lorawan.v3.AppAs/DownlinkQueuePush");

        assert_eq!(path.package, "ttn.lorawan.v3");
        assert_eq!(path.service, "AppAs");
        assert_eq!(path.method, "DownlinkQueuePush");
        assert_eq!(path.operation(), "AppAs.DownlinkQueuePush");
    }

    #[test]
    fn test_parse_unqualified_path() {
        let path = RpcPath::parse("/Service");

        assert_eq!(path.service, "Service");
        assert!(path.method.is_empty());
        assert_eq!(path.operation(), "Service");
    }

    #[test]
    fn test_ignored_paths() {
        let ignored = default_ignored_paths();

        assert!(is_ignored(&ignored, "/grpc.health.v1.Health/Check"));
        assert!(!is_ignored(&ignored, "/ttn.lorawan.v3.NsAs/HandleUplink"));
    }

    #[test]
    fn test_caller_kind() {
        let mut headers = http::HeaderMap::new();
        assert_eq!(caller_kind(&headers), "anonymous");

        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("ClusterKey 0011"),
        );
        assert_eq!(caller_kind(&headers), "cluster");

        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("Bearer NNSXS.KEY"),
        );
        assert_eq!(caller_kind(&headers), "application");
    }
}
