use kite::{App, Event, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

async fn roundtrip(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn serves_requests_and_shuts_down_gracefully() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = App::new().get("/hello/:name", |event: Event| async move {
        format!("hello {}", event.param("name").unwrap_or("?"))
    });

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::from_listener(listener).serve_with_shutdown(app, async {
            let _ = stopped.await;
        }),
    );

    let ok = roundtrip(addr, "GET /hello/kite HTTP/1.1\r\nhost: x\r\nconnection: close\r\n\r\n").await;
    assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
    assert!(ok.ends_with("hello kite"), "{ok}");

    let missing = roundtrip(addr, "GET /nope HTTP/1.1\r\nhost: x\r\nconnection: close\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");
    assert!(missing.contains("application/json"), "{missing}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn request_bodies_are_read_from_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = App::new().post("/echo", |event: Event| async move { event.text().await });

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::from_listener(listener).serve_with_shutdown(app, async {
            let _ = stopped.await;
        }),
    );

    let body = "ping";
    let raw = format!(
        "POST /echo HTTP/1.1\r\nhost: x\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let res = roundtrip(addr, &raw).await;
    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    assert!(res.ends_with("ping"), "{res}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
