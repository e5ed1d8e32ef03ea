//! End-to-end tests against a real listener.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tether_core::{ApplicationError, ClientId};
use tether_server::{ServerConfig, ServerHandle, TetherServer};
use tether_session::{CallArgs, ExposedMethods, Reply};

fn root() -> ExposedMethods {
    let mut root = ExposedMethods::new();
    let _ = root
        .expose_fn("echo", |args: CallArgs| async move {
            Ok::<_, ApplicationError>(Reply::Value(args.arg(0).cloned().unwrap_or(Value::Null)))
        })
        .expose_fn("relay", |args: CallArgs| async move {
            let session = args
                .session
                .ok_or_else(|| ApplicationError::msg("session is gone"))?;
            let answer = session
                .call_remote("pong", vec![json!("ping")])
                .await
                .map_err(|err| ApplicationError::msg(err.to_string()))?;
            Ok::<_, ApplicationError>(Reply::Value(answer))
        });
    root
}

async fn start_server() -> ServerHandle {
    let config = ServerConfig {
        shutdown_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    };
    TetherServer::new(config, || Arc::new(root()))
        .start()
        .await
        .expect("server starts")
}

async fn bootstrap(client: &reqwest::Client, handle: &ServerHandle) -> Value {
    let resp = client
        .post(format!("{}/live", handle.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn post_basket(client: &reqwest::Client, handle: &ServerHandle, activation: &Value, basket: Value) -> Value {
    let url = format!("{}{}", handle.base_url(), activation["inputUrl"].as_str().unwrap());
    let resp = client.post(url).body(basket.to_string()).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert_eq!(resp.headers()["pragma"], "no-cache");
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_reports_active_sessions() {
    let handle = start_server().await;
    let client = reqwest::Client::new();
    let _ = bootstrap(&client, &handle).await;

    let body: Value = client
        .get(format!("{}/health", handle.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_sessions"], 1);
    handle.stop().await;
}

#[tokio::test]
async fn client_call_is_answered_on_the_input_reply() {
    let handle = start_server().await;
    let client = reqwest::Client::new();
    let activation = bootstrap(&client, &handle).await;

    let reply = post_basket(
        &client,
        &handle,
        &activation,
        json!([-1, [[0, ["call", ["echo", "c2s0", 0, ["hi"], {}]]]]]),
    )
    .await;
    assert_eq!(reply[0], 0);
    assert_eq!(reply[1][0][1], json!(["respond", ["c2s0", true, "hi"]]));
    handle.stop().await;
}

#[tokio::test]
async fn server_calls_back_into_the_client() {
    let handle = start_server().await;
    let client = reqwest::Client::new();
    let activation = bootstrap(&client, &handle).await;

    let reply = post_basket(
        &client,
        &handle,
        &activation,
        json!([-1, [[0, ["call", ["relay", "c2s0", 0, [], {}]]]]]),
    )
    .await;
    let (seq, payload) = (&reply[1][0][0], &reply[1][0][1]);
    assert_eq!(payload[0], "call");
    assert_eq!(payload[1][0], "pong");
    assert_eq!(payload[1][3], json!(["ping"]));
    let request_id = payload[1][1].as_str().unwrap().to_owned();
    assert!(request_id.starts_with("s2c"));

    let reply = post_basket(
        &client,
        &handle,
        &activation,
        json!([seq, [[1, ["respond", [request_id, true, "pong!"]]]]]),
    )
    .await;
    assert_eq!(reply[0], 1);
    assert_eq!(reply[1][0][1], json!(["respond", ["c2s0", true, "pong!"]]));
    handle.stop().await;
}

#[tokio::test]
async fn unknown_client_is_not_found() {
    let handle = start_server().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/live/client_nobody/output", handle.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    handle.stop().await;
}

#[tokio::test]
async fn malformed_basket_is_bad_request() {
    let handle = start_server().await;
    let client = reqwest::Client::new();
    let activation = bootstrap(&client, &handle).await;

    let url = format!("{}{}", handle.base_url(), activation["inputUrl"].as_str().unwrap());
    let resp = client.post(url).body("[1, 2, 3]").send().await.unwrap();
    assert_eq!(resp.status(), 400);
    handle.stop().await;
}

#[tokio::test]
async fn shutdown_answers_parked_output_with_close() {
    let handle = start_server().await;
    let client = reqwest::Client::new();
    let activation = bootstrap(&client, &handle).await;
    let client_id = ClientId::from_raw(activation["clientId"].as_str().unwrap());

    let url = format!("{}{}", handle.base_url(), activation["outputUrl"].as_str().unwrap());
    let parked = tokio::spawn({
        let client = client.clone();
        async move { client.get(url).send().await.unwrap().json::<Value>().await.unwrap() }
    });

    let session = handle.sessions().get(&client_id).unwrap();
    for _ in 0..200 {
        if session.snapshot().await.unwrap().open_slots == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.snapshot().await.unwrap().open_slots, 1);

    handle.stop().await;
    let basket = parked.await.unwrap();
    assert_eq!(basket, json!([-1, [[0, ["close", []]]]]));
}
