// Endpoint extraction
// Names the RPC method a request is invoking; the name becomes the
// `endpoint` label on every request metric
//
// Numan Thabit 2025 Nov

use std::borrow::Cow;

/// A request that knows which RPC method it invokes.
pub trait Endpoint {
    fn endpoint(&self) -> Cow<'_, str>;
}

/// gRPC requests carry `/package.Service/Method` as their path. The label
/// uses `Service.Method`; other paths are kept as-is minus the leading slash.
impl<B> Endpoint for http::Request<B> {
    fn endpoint(&self) -> Cow<'_, str> {
        grpc_endpoint(self.uri().path())
    }
}

pub(crate) fn grpc_endpoint(path: &str) -> Cow<'_, str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((service, method))
            if !service.is_empty() && !method.is_empty() && !method.contains('/') =>
        {
            let service = service.rsplit('.').next().unwrap_or(service);
            Cow::Owned(format!("{service}.{method}"))
        }
        _ => Cow::Borrowed(trimmed),
    }
}
