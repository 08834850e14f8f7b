//! Request dispatcher: raw message in, raw message out.

use crate::application::Application;
use crate::error::{DispatchError, Error, LifecycleError};
use crate::http::{HttpMethod, Request, Response};
use crate::logging::{debug, error};
use bytes::Bytes;

impl Application {
    /// Dispatch one raw HTTP request through the handler chain
    pub async fn dispatch(&self, raw: http::Request<Bytes>) -> http::Response<Bytes> {
        let mut request = match self.request_factory().make_request(raw) {
            Ok(request) => request,
            Err(error) => {
                debug!(error = %error, "Could not build request");
                return Response::new(error.status_code())
                    .with_text(error.public_detail())
                    .into_http();
            }
        };

        let mut response = self.handle(&mut request).await;
        if request.method == HttpMethod::HEAD {
            response.body.clear();
        }

        debug!(
            request_id = request.request_id(),
            method = %request.method,
            path = %request.path,
            status = response.status,
            "Request dispatched"
        );
        response.into_http()
    }

    /// Run an already built request through the chain.
    ///
    /// Never fails: errors escaping the chain become a bare 500. Requests
    /// arriving before `ApplicationCreated` has fired get a 503.
    pub async fn handle(&self, request: &mut Request) -> Response {
        if !self.is_created() {
            let error = Error::Lifecycle(LifecycleError::NotCreated);
            return Response::new(error.status_code()).with_text(error.to_string());
        }

        let response = match self.chain().run(self, request).await {
            Ok(response) => Some(response),
            Err(err) => {
                error!(
                    request_id = request.request_id(),
                    error = %err,
                    "Unhandled error escaped the handler chain"
                );
                None
            }
        };

        self.run_finished_callbacks(request, response)
            .unwrap_or_else(internal_server_error)
    }

    fn run_finished_callbacks(&self, request: &mut Request, response: Option<Response>) -> Option<Response> {
        if request.is_static() {
            return response;
        }
        let callbacks = request.take_finished_callbacks();
        if callbacks.is_empty() {
            return response;
        }

        let failures: Vec<String> = callbacks
            .into_iter()
            .filter_map(|callback| callback(request, response.as_ref()).err())
            .collect();
        if failures.is_empty() {
            return response;
        }

        let err = Error::Dispatch(DispatchError::FinishedCallbacks(failures));
        error!(request_id = request.request_id(), error = %err, "Finished callbacks failed");
        let body = if self.debug() {
            err.to_string()
        } else {
            err.public_detail()
        };
        Some(Response::new(500).with_text(body))
    }
}

fn internal_server_error() -> Response {
    Response::new(500).with_text("Internal Server Error")
}
