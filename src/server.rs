//! HTTP transport for the [`Api`].
//!
//! Each request is answered from its own thread: a start or a stop may take
//! a few seconds while the previous terminal is being shut down, pollers
//! must not wait behind it.

use std::error::Error;
use std::thread;

use log::{debug, error, info};
use tiny_http::{Header, Request, Response, Server};

use crate::api::Api;

pub type ServerError = Box<dyn Error + Send + Sync + 'static>;

/// Bind `addr` and serve requests until the listener fails.
pub fn serve(api: Api, addr: &str) -> Result<(), ServerError> {
    let server = bind(addr)?;
    info!("Listening on http://{}", addr);

    for request in server.incoming_requests() {
        let api = api.clone();
        let spawned = thread::Builder::new()
            .name("http-request".into())
            .spawn(move || respond(&api, request));
        if let Err(ref e) = spawned {
            error!("could not handle request: {}", e);
        }
    }
    Ok(())
}

/// Bind the listener, retrying a few times in case the address is still held
/// by a previous instance.
fn bind(addr: &str) -> Result<Server, ServerError> {
    use retry::{delay, retry_with_index};

    let result = retry_with_index(delay::Fixed::from_millis(1000).take(4), |index| {
        debug!("Trying to bind {} ({})", addr, index);
        Server::http(addr)
    });
    match result {
        Ok(server) => Ok(server),
        Err(retry::Error::Operation {
            error,
            total_delay,
            tries,
        }) => {
            info!(
                "Failed to bind {} after {:?} and {} tries: {}",
                addr, total_delay, tries, error
            );
            Err(error)
        }
        Err(retry::Error::Internal(reason)) => {
            info!("Internal retry error while binding {}", addr);
            Err(reason.into())
        }
    }
}

fn respond(api: &Api, request: Request) {
    let reply = api.route(request.method().as_str(), request.url());
    let code = reply.code;
    let mut response = Response::from_string(reply.body).with_status_code(code);
    for (field, value) in headers(reply.content_type, reply.attachment.as_deref()) {
        match Header::from_bytes(field.as_bytes(), value.as_bytes()) {
            Ok(header) => response.add_header(header),
            Err(_) => error!("invalid header {}: {}", field, value),
        }
    }

    let url = request.url().to_owned();
    if let Err(ref e) = request.respond(response) {
        debug!("failed to answer {}: {}", url, e);
    } else {
        debug!("{} -> {}", url, code);
    }
}

fn headers(content_type: &str, attachment: Option<&str>) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Content-Type", content_type.to_owned()),
        ("Access-Control-Allow-Origin", "*".to_owned()),
    ];
    if let Some(name) = attachment {
        headers.push((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", name),
        ));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_replies_allow_any_origin() {
        let headers = headers("application/json", None);
        assert!(headers.contains(&("Access-Control-Allow-Origin", "*".to_owned())));
        assert!(headers.contains(&("Content-Type", "application/json".to_owned())));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn attachments_are_named() {
        let headers = headers("text/plain", Some("POSTCODE_LOG_a.txt"));
        assert!(headers.contains(&(
            "Content-Disposition",
            "attachment; filename=\"POSTCODE_LOG_a.txt\"".to_owned()
        )));
    }
}
