//! End-to-end tests against a running STAG instance.
//!
//! These need a live server (and its ArangoDB) and are ignored by default:
//!
//! ```sh
//! STAG_TEST_SERVER=http://localhost:8080 cargo test -p stag-server -- --ignored
//! ```

use serde_json::{json, Value};

fn base_url() -> String {
    std::env::var("STAG_TEST_SERVER").unwrap_or_else(|_| "http://localhost:8080".into())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn wait_for_server(client: &reqwest::Client) {
    let url = format!("{}/health", base_url());
    for _ in 0..30 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    panic!("server failed to become ready");
}

async fn post_event(client: &reqwest::Client, event: &Value) -> reqwest::Response {
    client
        .post(format!("{}/api/v1/ingest", base_url()))
        .json(event)
        .send()
        .await
        .expect("ingest request failed")
}

#[tokio::test]
#[ignore = "requires a running server"]
async fn ingest_then_query_round_trip() {
    let client = reqwest::Client::new();
    wait_for_server(&client).await;

    let session_id = format!("it-session-{}", now_ms());
    let event = json!({
        "session_id": session_id,
        "event_id": "event-1",
        "timestamp": now_ms(),
        "anchors": [{
            "id": "it-anchor-1",
            "session_id": session_id,
            "pose": { "x": 1.0, "y": 2.0, "z": 3.0, "rotation": [0.0, 0.0, 0.0, 1.0] },
            "timestamp": now_ms(),
        }],
        "meshes": [{
            "id": "it-mesh-1",
            "anchor_id": "it-anchor-1",
            "vertices": "AQIDBAUG",
            "faces": "AAEC",
            "compression_level": 5,
            "timestamp": now_ms(),
        }],
    });

    let resp = post_event(&client, &event).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["anchors_count"], 1);
    assert_eq!(body["meshes_count"], 1);

    let resp = client
        .get(format!(
            "{}/api/v1/query?session_id={session_id}&include_meshes=true",
            base_url()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let result: Value = resp.json().await.unwrap();
    assert_eq!(result["count"], 1);
    assert_eq!(result["anchors"][0]["id"], "it-anchor-1");
    assert_eq!(
        result["meshes"][0]["hash"],
        "ff06acabc8eff733920050af247e22c2330b80d5eba1bff4c0c737c346cc3526"
    );
}

#[tokio::test]
#[ignore = "requires a running server"]
async fn identical_meshes_deduplicate() {
    let client = reqwest::Client::new();
    wait_for_server(&client).await;

    let session_id = format!("it-dedup-{}", now_ms());
    for (event_id, mesh_id) in [("event-dedup-1", "mesh-dup-1"), ("event-dedup-2", "mesh-dup-2")] {
        let event = json!({
            "session_id": session_id,
            "event_id": event_id,
            "timestamp": now_ms(),
            "meshes": [{
                "id": mesh_id,
                "anchor_id": "it-anchor-1",
                "vertices": "AQIDBAUG",
                "faces": "AAEC",
                "compression_level": 5,
                "timestamp": now_ms(),
            }],
        });
        let resp = post_event(&client, &event).await;
        assert_eq!(resp.status(), 200, "ingest of {mesh_id} failed");
    }

    let resp = client
        .get(format!("{}/api/v1/metrics", base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let metrics: Value = resp.json().await.unwrap();
    assert!(metrics["total_meshes"].as_i64().unwrap() >= 1);
}

#[tokio::test]
#[ignore = "requires a running server"]
async fn delta_meshes_validate_and_store() {
    let client = reqwest::Client::new();
    wait_for_server(&client).await;

    let session_id = format!("it-delta-{}", now_ms());

    // Delta without a base is rejected up front.
    let bad = json!({
        "session_id": session_id,
        "event_id": "event-bad-delta",
        "timestamp": now_ms(),
        "meshes": [{
            "id": "bad-delta",
            "anchor_id": "it-anchor-1",
            "is_delta": true,
            "delta_data": "CgsM",
            "compression_level": 5,
            "timestamp": now_ms(),
        }],
    });
    let resp = post_event(&client, &bad).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");

    // Base mesh, then a delta referencing it.
    let base = json!({
        "session_id": session_id,
        "event_id": "event-base",
        "timestamp": now_ms(),
        "meshes": [{
            "id": "it-base-mesh",
            "anchor_id": "it-anchor-1",
            "vertices": "AQIDBAUGBwgJ",
            "faces": "AAECAwQF",
            "compression_level": 5,
            "timestamp": now_ms(),
        }],
    });
    assert_eq!(post_event(&client, &base).await.status(), 200);

    let delta = json!({
        "session_id": session_id,
        "event_id": "event-delta",
        "timestamp": now_ms(),
        "meshes": [{
            "id": "it-delta-mesh",
            "anchor_id": "it-anchor-1",
            "is_delta": true,
            "base_mesh_id": "it-base-mesh",
            "delta_data": "CgsM",
            "compression_level": 5,
            "timestamp": now_ms(),
        }],
    });
    assert_eq!(post_event(&client, &delta).await.status(), 200);
}
