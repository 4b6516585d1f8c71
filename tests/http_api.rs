use cube_db_rust::api::routes::create_router;
use cube_db_rust::model::app_id::{ApplicationId, ReleaseStatus, HEAD};
use cube_db_rust::model::cube::{CellValue, Cube};
use cube_db_rust::model::format;
use cube_db_rust::model::value::{AxisType, AxisValueType, ColumnOrder, ColumnValue, Range, Scalar};
use cube_db_rust::store::{MemoryPersister, Registry};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

// Test client wrapper for making API calls as a given user
struct TestClient {
    client: Client,
    base_url: String,
    user: String,
}

impl TestClient {
    fn new(base_url: String, user: &str) -> Self {
        Self {
            client: Client::new(),
            base_url,
            user: user.to_string(),
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("x-user-id", &self.user)
            .send()
            .await
            .expect("request sends")
    }

    async fn put(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .header("x-user-id", &self.user)
            .json(&body)
            .send()
            .await
            .expect("request sends")
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("x-user-id", &self.user)
            .json(&body)
            .send()
            .await
            .expect("request sends")
    }

    async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .header("x-user-id", &self.user)
            .send()
            .await
            .expect("request sends")
    }
}

async fn spawn_server() -> String {
    let persister = Arc::new(MemoryPersister::new());
    let registry = Arc::new(Registry::with_default_evaluator(persister));
    let app = create_router().with_state(registry);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });
    format!("http://{}", addr)
}

fn head_app() -> ApplicationId {
    ApplicationId::new("acme", "alpha", "1.0.0", ReleaseStatus::Snapshot, HEAD).unwrap()
}

fn rates_cube() -> Value {
    let mut cube = Cube::new("rates", head_app()).unwrap();
    cube.add_axis(
        "age",
        AxisType::Range,
        AxisValueType::Long,
        ColumnOrder::Sorted,
        false,
    )
    .unwrap();
    cube.add_axis(
        "state",
        AxisType::Discrete,
        AxisValueType::String,
        ColumnOrder::Display,
        true,
    )
    .unwrap();
    for (lo, hi) in [(0i64, 18i64), (18, 65), (65, 120)] {
        cube.add_column(
            "age",
            Some(ColumnValue::Range(
                Range::new(Scalar::Long(lo), Scalar::Long(hi)).unwrap(),
            )),
        )
        .unwrap();
    }
    cube.add_column("state", Some(ColumnValue::Scalar(Scalar::Str("OH".into()))))
        .unwrap();
    let mut coord = std::collections::HashMap::new();
    coord.insert("age".to_string(), json!(30));
    coord.insert("state".to_string(), json!("OH"));
    cube.set_cell(&coord, CellValue::Json(json!(1.75))).unwrap();
    format::to_json(&cube, false)
}

const HEAD_BASE: &str = "/apps/acme/alpha/1.0.0/SNAPSHOT/HEAD";

#[tokio::test]
async fn cube_crud_and_lookup_over_http() {
    let base = spawn_server().await;
    let jane = TestClient::new(base, "jane");

    let health = jane.get("/health").await;
    assert_eq!(health.status(), 200);

    // Create
    let resp = jane
        .put(&format!("{}/cubes/rates", HEAD_BASE), rates_cube())
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["sha1"].as_str().is_some());

    // Read back
    let resp = jane.get(&format!("{}/cubes/rates", HEAD_BASE)).await;
    assert_eq!(resp.status(), 200);
    let cube_json: Value = resp.json().await.unwrap();
    assert_eq!(cube_json["ncube"], json!("rates"));
    assert_eq!(cube_json["axes"].as_array().unwrap().len(), 2);

    // Coordinate lookup binds the range and the discrete column
    let resp = jane
        .post(
            &format!("{}/cubes/rates/cell", HEAD_BASE),
            json!({"age": 30, "state": "OH"}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["value"], json!(1.75));

    // Unbindable coordinate is a 404
    let resp = jane
        .post(
            &format!("{}/cubes/rates/cell", HEAD_BASE),
            json!({"age": 500, "state": "OH"}),
        )
        .await;
    assert_eq!(resp.status(), 404);

    // Search
    let resp = jane
        .get(&format!("{}/cubes?name=rat*&active_only=true", HEAD_BASE))
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], json!(1));

    // Missing cube is a 404
    let resp = jane.get(&format!("{}/cubes/ghost", HEAD_BASE)).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn overlapping_columns_are_a_conflict() {
    let base = spawn_server().await;
    let jane = TestClient::new(base, "jane");

    let mut cube_json = rates_cube();
    // Duplicate the first age column value to force an overlap on decode.
    let cols = cube_json["axes"][0]["columns"].as_array().unwrap().clone();
    let mut first = cols[0].clone();
    first["id"] = json!(first["id"].as_i64().unwrap() + 1000);
    cube_json["axes"][0]["columns"]
        .as_array_mut()
        .unwrap()
        .push(first);

    let resp = jane
        .put(&format!("{}/cubes/rates", HEAD_BASE), cube_json)
        .await;
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn branch_release_and_permission_flow() {
    let base = spawn_server().await;
    let jane = TestClient::new(base.clone(), "jane");
    let bob = TestClient::new(base, "bob");

    // Bootstrap mode: jane creates the first cube, then the branch copy
    // seeds the permission cubes with jane as admin.
    let resp = jane
        .put(&format!("{}/cubes/rates", HEAD_BASE), rates_cube())
        .await;
    assert_eq!(resp.status(), 200);

    let resp = jane
        .post(
            &format!("{}/copy", HEAD_BASE),
            json!({"target_branch": "mybranch"}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["copied"], json!(1));

    // A non-admin cannot release.
    let resp = bob
        .post(
            &format!("{}/release", HEAD_BASE),
            json!({"new_version": "1.1.0"}),
        )
        .await;
    assert_eq!(resp.status(), 403);

    // The admin can.
    let resp = jane
        .post(
            &format!("{}/release", HEAD_BASE),
            json!({"new_version": "1.1.0"}),
        )
        .await;
    assert_eq!(resp.status(), 200);

    // Prior SNAPSHOT is now RELEASE; the new HEAD SNAPSHOT carries the
    // copied-through content; the branch moved to the new version.
    let resp = jane
        .get("/apps/acme/alpha/1.0.0/RELEASE/HEAD/cubes/rates")
        .await;
    assert_eq!(resp.status(), 200);
    let resp = jane
        .get("/apps/acme/alpha/1.1.0/SNAPSHOT/HEAD/cubes/rates")
        .await;
    assert_eq!(resp.status(), 200);
    let resp = jane
        .get("/apps/acme/alpha/1.1.0/SNAPSHOT/mybranch/cubes/rates")
        .await;
    assert_eq!(resp.status(), 200);
    let resp = jane.get(&format!("{}/cubes/rates", HEAD_BASE)).await;
    assert_eq!(resp.status(), 404);

    // RELEASE coordinates reject mutation.
    let resp = jane
        .put(
            "/apps/acme/alpha/1.0.0/RELEASE/HEAD/cubes/rates",
            rates_cube(),
        )
        .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn app_lock_over_http() {
    let base = spawn_server().await;
    let jane = TestClient::new(base.clone(), "jane");
    let bob = TestClient::new(base, "bob");

    let resp = jane.post(&format!("{}/lock", HEAD_BASE), json!({})).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["acquired"], json!(true));

    // Lock state is observable by anyone.
    let resp = bob.get(&format!("{}/lock", HEAD_BASE)).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["holder"], json!("jane"));

    // Contention surfaces as a security failure.
    let resp = bob.post(&format!("{}/lock", HEAD_BASE), json!({})).await;
    assert_eq!(resp.status(), 403);
    let resp = bob.delete(&format!("{}/lock", HEAD_BASE)).await;
    assert_eq!(resp.status(), 403);

    let resp = jane.delete(&format!("{}/lock", HEAD_BASE)).await;
    assert_eq!(resp.status(), 200);
    let resp = bob.post(&format!("{}/lock", HEAD_BASE), json!({})).await;
    assert_eq!(resp.status(), 200);
}
