use indoc::indoc;
use integration_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn admitted_request_reaches_upstream() {
    let server = TestServer::builder().with_upstream().build("").await;

    let response = server.client.get("/api/posts?page=2").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-ratelimit-limit"], "60");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "59");

    let body: serde_json::Value = response.json().await.unwrap();
    insta::assert_json_snapshot!(body, @r#"
    {
      "code": 200,
      "data": [
        {
          "id": 1,
          "title": "Hello"
        }
      ],
      "message": "ok"
    }
    "#);

    assert_eq!(server.upstream().hits(), 1);
}

#[tokio::test]
async fn post_body_is_forwarded() {
    let server = TestServer::builder().with_upstream().build("").await;

    let response = server
        .client
        .post_as("1.2.3.4", "/api/auth/login", &json!({ "username": "ada", "password": "secret" }))
        .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["user"], "ada");
}

#[tokio::test]
async fn peer_address_is_appended_to_forwarded_for() {
    let server = TestServer::builder().with_upstream().build("").await;

    let response = server.client.get_as("9.9.9.9", "/api/echo/headers").await;
    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body["data"]["x-forwarded-for"], "9.9.9.9, 127.0.0.1");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let server = TestServer::builder().with_upstream().build("").await;

    let response = server
        .client
        .request(reqwest::Method::POST, "/api/auth/register")
        .body(vec![b'x'; 4096])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 413);
    assert_eq!(server.upstream().hits(), 0);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"code":413,"message":"Request body too large","data":null}"#);
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = TestServer::builder().with_upstream().build("").await;

    let response = server.client.get("/api/slow").await;
    assert_eq!(response.status(), 504);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"code":504,"message":"Upstream timed out","data":null}"#);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let config = indoc! {r#"
        [upstream]
        url = "http://127.0.0.1:1"
    "#};

    let server = TestServer::builder().build(config).await;

    let response = server.client.get("/api/posts").await;
    assert_eq!(response.status(), 502);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"code":502,"message":"Upstream unavailable","data":null}"#);
}

#[tokio::test]
async fn no_upstream_is_not_found() {
    let server = TestServer::builder().build("").await;

    let response = server.client.get("/api/posts").await;
    assert_eq!(response.status(), 404);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @r#"{"code":404,"message":"Not found","data":null}"#);
}
