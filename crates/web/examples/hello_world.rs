use ethweb::Server;
use ethweb_http::protocol::MethodSet;
use http::StatusCode;

#[tokio::main]
async fn main() {
    let mut server = Server::builder().address("127.0.0.1:3000").build().unwrap();
    server.on("/", MethodSet::GET, |req| req.send_content(StatusCode::OK, "text/plain", "Hello World!"));
    server.on_not_found(|req| req.send_content(StatusCode::NOT_FOUND, "text/plain", "404 not found"));

    server.start().await.unwrap();
}
