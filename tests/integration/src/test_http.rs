//! Wire-level scenarios against the HTTP service on a loopback socket.

#[cfg(test)]
mod tests {
    use hyper_util::rt::TokioIo;
    use serde_json::{Value, json};
    use syncstack_http::SyncStackHttpService;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use crate::provider;

    /// Serve connections on an ephemeral port, returning its address.
    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let service = SyncStackHttpService::new(provider(), None);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        addr
    }

    /// Send one HTTP/1.1 request and return the status line, raw head and JSON body.
    async fn send(addr: &str, path: &str, target: Option<&str>, body: &Value) -> (u16, String, Value) {
        let body = body.to_string();
        let target = target
            .map(|t| format!("X-Amz-Target: DynamoDB_20120810.{t}\r\n"))
            .unwrap_or_default();
        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\
             Content-Type: application/x-amz-json-1.0\r\n{target}Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let (head, payload) = response.split_once("\r\n\r\n").unwrap();
        let status = head.split(' ').nth(1).unwrap().parse().unwrap();
        (status, head.to_owned(), serde_json::from_str(payload).unwrap())
    }

    #[tokio::test]
    async fn test_should_serve_table_protocol_over_tcp() {
        let addr = spawn_server().await;

        let (status, head, _) = send(
            &addr,
            "/",
            Some("CreateTable"),
            &json!({
                "TableName": "Users",
                "KeySchema": [{"AttributeName": "id", "KeyType": "HASH"}],
                "AttributeDefinitions": [{"AttributeName": "id", "AttributeType": "S"}]
            }),
        )
        .await;
        assert_eq!(status, 200);
        let head = head.to_lowercase();
        assert!(head.contains("x-amz-crc32"));
        assert!(head.contains("server: syncstack"));

        let (status, _, _) = send(
            &addr,
            "/",
            Some("PutItem"),
            &json!({"TableName": "Users", "Item": {"id": {"S": "u1"}, "age": {"N": "30"}}}),
        )
        .await;
        assert_eq!(status, 200);

        let (status, _, body) = send(
            &addr,
            "/",
            Some("GetItem"),
            &json!({"TableName": "Users", "Key": {"id": {"S": "u1"}}}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["Item"]["age"], json!({"N": "30"}));

        let (status, _, body) = send(
            &addr,
            "/",
            Some("PutItem"),
            &json!({
                "TableName": "Users",
                "Item": {"id": {"S": "u1"}},
                "ConditionExpression": "attribute_not_exists(id)"
            }),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(
            body["__type"],
            "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException"
        );
    }

    #[tokio::test]
    async fn test_should_report_missing_graphql_api() {
        let addr = spawn_server().await;
        let (status, _, body) = send(&addr, "/graphql", None, &json!({})).await;
        assert_eq!(status, 404);
        assert!(body["message"].as_str().unwrap().contains("/graphql"));
    }
}
