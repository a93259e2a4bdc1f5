//! A device-style server: static files, a settings form, a JSON API, the
//! file editor and a password protected page.

use std::sync::Arc;

use ethweb::auth::{Credentials, RequestAuth};
use ethweb::filter::header;
use ethweb::handler::{CallbackHandler, EditorHandler, JsonHandler, JsonResponse};
use ethweb::link::{LinkEvent, LinkState};
use ethweb::{Rewrite, Server};
use ethweb_http::fs::{FileSystem, MemoryFs};
use ethweb_http::protocol::MethodSet;
use http::StatusCode;

#[tokio::main]
async fn main() {
    let fs = Arc::new(MemoryFs::new());
    fs.insert("/www/index.htm", "<h1>ethweb</h1><a href=\"/settings\">settings</a>");
    fs.insert("/www/style.css", "h1 { color: teal; }");

    let link = LinkState::new();
    link.on_event(LinkEvent::Start);
    link.on_event(LinkEvent::Connected);
    link.on_event(LinkEvent::GotIp("127.0.0.1".parse().unwrap()));

    let mut server = Server::builder().address("127.0.0.1:8080").build().unwrap();
    server
        .add_rewrite(Rewrite::new("/", "/www/index.htm"))
        .serve_static("/www", Arc::clone(&fs) as Arc<dyn FileSystem>, "/www", Some("max-age=600"))
        .on("/settings", MethodSet::GET | MethodSet::POST, |req| {
            let ssid = req.arg("ssid").unwrap_or("not set").to_owned();
            req.send_content(StatusCode::OK, "text/plain", format!("ssid: {ssid}"));
        })
        .add_handler(Arc::new(JsonHandler::new("/api/led").on_request(|req, json| {
            let mut response = JsonResponse::new(false);
            response["led"] = json["on"].clone();
            req.send(response.into_response());
        })))
        .add_handler(Arc::new(EditorHandler::new(fs).with_credentials(Credentials::new("admin", "admin"))))
        .add_handler(Arc::new(
            CallbackHandler::new("/debug")
                .with_filter(header("x-debug", "1"))
                .on_request(|req| req.send_content(StatusCode::OK, "text/plain", format!("{:?}", req.remote_addr()))),
        ))
        .on("/admin", MethodSet::GET, |req| {
            if !req.authenticate("admin", "admin", None, false) {
                req.request_authentication(None, true);
                return;
            }
            req.send_content(StatusCode::OK, "text/plain", "welcome");
        });

    if let Some(ip) = link.wait_connected().await {
        println!("serving on http://{ip}:8080/");
    }
    server.start().await.unwrap();
}
