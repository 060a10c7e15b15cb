// Request outcome classification
// Decides whether a handled request counts as a success or a failure for
// the `status` label of the request counter
//
// Numan Thabit 2025 Nov

use http::header::HeaderValue;
use tonic::Code;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Label value written to the `status` label.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Maps a handler result to an [`Outcome`].
pub trait Classify<T, E> {
    fn classify(&self, result: &Result<T, E>) -> Outcome;
}

/// `Ok` is a success, `Err` a failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorsAsFailures;

impl<T, E> Classify<T, E> for ErrorsAsFailures {
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        }
    }
}

/// For gRPC servers: a handler error travels back as a response whose
/// headers carry a non-zero `grpc-status`, so such responses count as
/// failures as well. Statuses delivered in trailers are not inspected.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcErrorsAsFailures;

impl<B, E> Classify<http::Response<B>, E> for GrpcErrorsAsFailures {
    fn classify(&self, result: &Result<http::Response<B>, E>) -> Outcome {
        match result {
            Ok(response) => match response.headers().get("grpc-status") {
                Some(status) if grpc_code(status) != Code::Ok => Outcome::Failure,
                _ => Outcome::Success,
            },
            Err(_) => Outcome::Failure,
        }
    }
}

fn grpc_code(value: &HeaderValue) -> Code {
    Code::from_bytes(value.as_bytes())
}
