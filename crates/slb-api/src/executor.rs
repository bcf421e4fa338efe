//! Work execution seam for `doWork` requests.

use std::future::Future;
use std::pin::Pin;

use axum::http::Uri;
use axum::response::Response;

use slb_core::SlbRequest;

pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// Runs a `doWork` request against the selected backend.
///
/// The dispatcher only picks the target. Whatever the executor returns is
/// sent to the client unchanged.
pub trait WorkExecutor: Send + Sync {
    /// `target` is the chosen `ip:port`; `uri` is the URI the client called.
    fn execute<'a>(&'a self, target: &'a str, request: SlbRequest, uri: Uri) -> ExecuteFuture<'a>;
}
