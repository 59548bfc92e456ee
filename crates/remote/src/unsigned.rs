//! Keeps selected headers out of SigV4 signatures.
//!
//! Google Cloud Storage's S3 interoperability layer rewrites
//! `Accept-Encoding` in transit, so a signature covering it never
//! verifies. The header is taken off before signing and put back before
//! the request is sent.

use aws_sdk_s3::config::http::HttpRequest;
use aws_sdk_s3::config::interceptors::BeforeTransmitInterceptorContextMut;
use aws_sdk_s3::config::{ConfigBag, Intercept, RuntimeComponents};
use aws_sdk_s3::error::BoxError;
use aws_smithy_types::config_bag::{Storable, StoreReplace};

/// Headers GCS alters between the client and its signature check.
pub(crate) const GCS_UNSIGNED: &[&str] = &["accept-encoding"];

/// Returns `true` for Google Cloud Storage endpoints.
pub(crate) fn is_gcs_endpoint(endpoint: &str) -> bool {
    endpoint.contains("storage.googleapis.com")
}

/// Headers removed from one request until it is signed.
#[derive(Debug, Clone, Default)]
struct Stripped(Vec<(&'static str, String)>);

impl Storable for Stripped {
    type Storer = StoreReplace<Self>;
}

/// Interceptor that leaves `names` out of the signed header set.
#[derive(Debug)]
pub(crate) struct UnsignedHeaders {
    names: &'static [&'static str],
}

impl UnsignedHeaders {
    pub(crate) fn new(names: &'static [&'static str]) -> Self {
        Self { names }
    }
}

impl Intercept for UnsignedHeaders {
    fn name(&self) -> &'static str {
        "UnsignedHeaders"
    }

    fn modify_before_signing(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let stripped = strip(context.request_mut(), self.names);
        cfg.interceptor_state().store_put(stripped);
        Ok(())
    }

    fn modify_before_transmit(
        &self,
        context: &mut BeforeTransmitInterceptorContextMut<'_>,
        _runtime_components: &RuntimeComponents,
        cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        if let Some(stripped) = cfg.load::<Stripped>() {
            restore(context.request_mut(), stripped);
        }
        Ok(())
    }
}

fn strip(request: &mut HttpRequest, names: &'static [&'static str]) -> Stripped {
    let headers = request.headers_mut();
    Stripped(
        names
            .iter()
            .filter_map(|&name| headers.remove(name).map(|value| (name, value)))
            .collect(),
    )
}

fn restore(request: &mut HttpRequest, stripped: &Stripped) {
    let headers = request.headers_mut();
    for (name, value) in &stripped.0 {
        headers.insert(*name, value.clone());
    }
}
