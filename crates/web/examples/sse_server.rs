use std::sync::Arc;
use std::time::Duration;

use ethweb::{EventSource, Server};
use ethweb_http::protocol::MethodSet;
use http::StatusCode;

const PAGE: &str = r#"<!DOCTYPE html>
<html><body><pre id="log"></pre>
<script>
const source = new EventSource('/events');
source.addEventListener('counter', e => document.getElementById('log').textContent += e.data + '\n');
</script>
</body></html>"#;

#[tokio::main]
async fn main() {
    let events = EventSource::new("/events").on_connect(|client| {
        if client.last_id() > 0 {
            println!("client reconnected, last event id {}", client.last_id());
        }
        client.send("hello!", None, None, Some(1000));
    });

    let mut server = Server::builder().address("127.0.0.1:8080").build().unwrap();
    server.on("/", MethodSet::GET, |req| req.send_content(StatusCode::OK, "text/html", PAGE)).add_handler(Arc::new(events.clone()));

    tokio::spawn(async move {
        let mut id = 0;
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            id += 1;
            events.send(&id.to_string(), Some("counter"), Some(id), None);
        }
    });

    server.start().await.unwrap();
}
