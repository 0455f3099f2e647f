use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};

use traffic_monitor::routes::{self, endpoints, Capability};
use traffic_monitor::{MemoryStore, Store};

const ADMIN: &str = "admintoken";
const VIEWER: &str = "viewertoken";

fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.create_user("admin", true, ADMIN).unwrap();
    store.create_user("viewer", false, VIEWER).unwrap();
    Arc::new(store)
}

macro_rules! app {
    ($store:expr) => {{
        let store: Arc<dyn Store> = $store;
        test::init_service(
            App::new()
                .app_data(web::Data::from(store))
                .configure(routes::configure),
        )
        .await
    }};
}

fn segment_body(lon: f64) -> Value {
    json!({
        "longitude_start": lon,
        "latitude_start": 30.5,
        "longitude_end": lon + 0.1,
        "latitude_end": 30.6,
        "length": 100.9
    })
}

fn as_admin(req: test::TestRequest) -> test::TestRequest {
    req.insert_header(("Authorization", format!("Token {}", ADMIN)))
}

macro_rules! call {
    ($app:expr, $req:expr) => {
        test::call_service(&$app, $req.to_request()).await
    };
}

macro_rules! create_segment {
    ($app:expr, $lon:expr) => {{
        let req = as_admin(test::TestRequest::post().uri("/api/segments/")).set_json(segment_body($lon));
        let resp = call!($app, req);
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        body["id"].as_i64().unwrap()
    }};
}

macro_rules! create_reading {
    ($app:expr, $segment:expr, $speed:expr, $timestamp:expr) => {{
        let req = as_admin(test::TestRequest::post().uri("/api/readings/")).set_json(json!({
            "road_segment": $segment,
            "average_speed": $speed,
            "timestamp": $timestamp
        }));
        let resp = call!($app, req);
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        body
    }};
}

#[actix_web::test]
async fn anonymous_can_read_but_not_write() {
    let store = seeded_store();
    let app = app!(store.clone());
    create_segment!(app, 10.0);

    let resp = call!(app, test::TestRequest::get().uri("/api/segments/"));
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let resp = call!(
        app,
        test::TestRequest::post().uri("/api/segments/").set_json(segment_body(20.0))
    );
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(store.list_segments(&Default::default()).unwrap().len(), 1);
}

#[actix_web::test]
async fn non_admin_is_forbidden_and_bad_token_is_unauthorized() {
    let store = seeded_store();
    let app = app!(store.clone());

    let resp = call!(
        app,
        test::TestRequest::post()
            .uri("/api/segments/")
            .insert_header(("Authorization", format!("Token {}", VIEWER)))
            .set_json(segment_body(1.0))
    );
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = call!(
        app,
        test::TestRequest::post()
            .uri("/api/segments/")
            .insert_header(("Authorization", "Token wrong"))
            .set_json(segment_body(1.0))
    );
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(store.list_segments(&Default::default()).unwrap().is_empty());
}

#[actix_web::test]
async fn every_write_endpoint_rejects_anonymous_callers() {
    let store = seeded_store();
    let app = app!(store.clone());
    let segment = create_segment!(app, 1.0);
    let reading = create_reading!(app, segment, 30.0, "2024-01-01T10:00:00Z");

    for endpoint in endpoints().into_iter().filter(|e| e.capability == Capability::Write) {
        let id = if endpoint.path.starts_with("/api/segments") {
            segment
        } else {
            reading["id"].as_i64().unwrap()
        };
        let uri = endpoint.path.replace("{id}", &id.to_string());
        let resp = call!(
            app,
            test::TestRequest::default()
                .method(endpoint.method.clone())
                .uri(&uri)
                .set_json(segment_body(5.0))
        );
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", endpoint.method, uri);
    }

    assert_eq!(store.list_segments(&Default::default()).unwrap().len(), 1);
    assert_eq!(store.list_readings(&Default::default()).unwrap().len(), 1);
}

#[actix_web::test]
async fn admin_full_segment_lifecycle() {
    let app = app!(seeded_store());
    let id = create_segment!(app, 85.4);

    let resp = call!(app, test::TestRequest::get().uri(&format!("/api/segments/{}/", id)));
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total_readings"], 0);
    assert!(body["latest_reading"].is_null());
    assert_eq!(body["length"], 100.9);

    let resp = call!(
        app,
        as_admin(test::TestRequest::patch().uri(&format!("/api/segments/{}/", id)))
            .set_json(json!({ "length": 510.5 }))
    );
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["length"], 510.5);
    assert_eq!(body["longitude_start"], 85.4);

    let resp = call!(
        app,
        as_admin(test::TestRequest::put().uri(&format!("/api/segments/{}/", id)))
            .set_json(json!({ "length": 1.0 }))
    );
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["longitude_start"][0], "This field is required.");

    let resp = call!(
        app,
        as_admin(test::TestRequest::put().uri(&format!("/api/segments/{}/", id))).set_json(segment_body(1.0))
    );
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = call!(
        app,
        as_admin(test::TestRequest::delete().uri(&format!("/api/segments/{}/", id)))
    );
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = call!(app, test::TestRequest::get().uri(&format!("/api/segments/{}/", id)));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn admin_full_reading_lifecycle() {
    let app = app!(seeded_store());
    let segment = create_segment!(app, 1.0);
    let reading = create_reading!(app, segment, 15.0, "2024-01-01T10:00:00Z");
    assert_eq!(reading["intensity"], "elevada");
    assert_eq!(reading["road_segment"], segment);
    let id = reading["id"].as_i64().unwrap();

    let resp = call!(
        app,
        as_admin(test::TestRequest::patch().uri(&format!("/api/readings/{}/", id)))
            .set_json(json!({ "average_speed": 35.44 }))
    );
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["intensity"], "média");

    let resp = call!(
        app,
        as_admin(test::TestRequest::put().uri(&format!("/api/readings/{}/", id))).set_json(json!({
            "road_segment": segment,
            "average_speed": 100.0,
            "timestamp": "2024-01-01T11:00:00Z"
        }))
    );
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["intensity"], "baixa");

    let resp = call!(
        app,
        as_admin(test::TestRequest::delete().uri(&format!("/api/readings/{}/", id)))
    );
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = call!(app, test::TestRequest::get().uri(&format!("/api/readings/{}/", id)));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn reading_for_unknown_segment_is_not_found() {
    let store = seeded_store();
    let app = app!(store.clone());
    let resp = call!(
        app,
        as_admin(test::TestRequest::post().uri("/api/readings/")).set_json(json!({
            "road_segment": 999,
            "average_speed": 40.0,
            "timestamp": "2024-01-01T10:00:00Z"
        }))
    );
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(store.list_readings(&Default::default()).unwrap().is_empty());
}

#[actix_web::test]
async fn detail_tracks_count_and_latest_reading() {
    let app = app!(seeded_store());
    let id = create_segment!(app, 1.0);
    let first = create_reading!(app, id, 15.0, "2024-01-01T10:00:00Z");

    let resp = call!(app, test::TestRequest::get().uri(&format!("/api/segments/{}/", id)));
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total_readings"], 1);
    assert_eq!(body["latest_reading"], first);

    create_reading!(app, id, 55.0, "2024-01-01T12:00:00Z");
    // Older measurement recorded later must not become the latest.
    create_reading!(app, id, 5.0, "2024-01-01T09:00:00Z");

    let resp = call!(app, test::TestRequest::get().uri(&format!("/api/segments/{}/", id)));
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total_readings"], 3);
    assert_eq!(body["latest_reading"]["average_speed"], 55.0);
    assert_eq!(body["latest_reading"]["intensity"], "baixa");
}

#[actix_web::test]
async fn list_filters_segments_by_latest_intensity() {
    let app = app!(seeded_store());
    let a = create_segment!(app, 1.0);
    let b = create_segment!(app, 2.0);
    let c = create_segment!(app, 3.0);
    let _empty = create_segment!(app, 4.0);
    create_reading!(app, a, 15.0, "2024-01-01T10:00:00Z");
    create_reading!(app, b, 35.0, "2024-01-01T10:00:00Z");
    create_reading!(app, c, 65.0, "2024-01-01T10:00:00Z");

    for (query, expected) in [
        ("elevada", a),
        ("m%C3%A9dia", b),
        ("baixa", c),
    ] {
        let resp = call!(
            app,
            test::TestRequest::get().uri(&format!("/api/segments/?intensity={}", query))
        );
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        let ids: Vec<i64> = body.as_array().unwrap().iter().map(|s| s["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![expected], "intensity={}", query);
        assert!(body[0].get("latest_reading").is_none());
    }

    let resp = call!(app, test::TestRequest::get().uri("/api/segments/?intensity=Elevada"));
    let body: Value = test::read_body_json(resp).await;
    assert!(body.as_array().unwrap().is_empty());

    let resp = call!(app, test::TestRequest::get().uri("/api/segments/"));
    let body: Value = test::read_body_json(resp).await;
    let ids: Vec<i64> = body.as_array().unwrap().iter().map(|s| s["id"].as_i64().unwrap()).collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[actix_web::test]
async fn readings_filter_by_segment_and_cascade_on_delete() {
    let app = app!(seeded_store());
    let a = create_segment!(app, 1.0);
    let b = create_segment!(app, 2.0);
    create_reading!(app, a, 10.0, "2024-01-01T08:00:00Z");
    create_reading!(app, a, 20.0, "2024-01-01T12:00:00Z");
    create_reading!(app, b, 30.0, "2024-01-01T10:00:00Z");

    let resp = call!(app, test::TestRequest::get().uri(&format!("/api/readings/?road_segment={}", a)));
    let body: Value = test::read_body_json(resp).await;
    let readings = body.as_array().unwrap();
    assert_eq!(readings.len(), 2);
    assert!(readings.iter().all(|r| r["road_segment"] == a));
    assert_eq!(readings[0]["timestamp"], "2024-01-01T12:00:00Z");
    assert_eq!(readings[1]["timestamp"], "2024-01-01T08:00:00Z");

    let resp = call!(app, test::TestRequest::get().uri("/api/readings/?road_segment=abc"));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = call!(app, as_admin(test::TestRequest::delete().uri(&format!("/api/segments/{}/", a))));
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = call!(app, test::TestRequest::get().uri("/api/readings/"));
    let body: Value = test::read_body_json(resp).await;
    let readings = body.as_array().unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0]["road_segment"], b);
}

#[actix_web::test]
async fn every_table_entry_is_routed_with_its_capability() {
    let store = seeded_store();
    let app = app!(store.clone());
    let segment = create_segment!(app, 1.0);
    let owner = create_segment!(app, 2.0);
    let created = create_reading!(app, owner, 30.0, "2024-01-01T10:00:00Z");
    let reading = created["id"].as_i64().unwrap();
    let reading_body = json!({
        "road_segment": owner,
        "average_speed": 12.0,
        "timestamp": "2024-01-01T11:00:00Z"
    });

    for endpoint in endpoints() {
        let (id, body) = if endpoint.path.starts_with("/api/segments") {
            (segment, segment_body(3.0))
        } else {
            (reading, reading_body.clone())
        };
        let uri = endpoint.path.replace("{id}", &id.to_string());
        let label = format!("{} {}", endpoint.method, uri);

        let anonymous = call!(
            app,
            test::TestRequest::default()
                .method(endpoint.method.clone())
                .uri(&uri)
                .set_json(body.clone())
        );
        match endpoint.capability {
            Capability::Read => assert_eq!(anonymous.status(), StatusCode::OK, "{}", label),
            Capability::Write => assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED, "{}", label),
        }

        let admin = call!(
            app,
            as_admin(test::TestRequest::default().method(endpoint.method.clone()).uri(&uri)).set_json(body)
        );
        assert!(admin.status().is_success(), "{} -> {}", label, admin.status());
    }

    let resp = call!(app, test::TestRequest::post().uri(&format!("/api/readings/{}/", reading)));
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[actix_web::test]
async fn non_json_bodies_are_unsupported() {
    let store = seeded_store();
    let app = app!(store.clone());
    let resp = call!(
        app,
        as_admin(test::TestRequest::post().uri("/api/segments/"))
            .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
            .set_payload("longitude_start=1&latitude_start=2&longitude_end=3&latitude_end=4&length=5")
    );
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(store.list_segments(&Default::default()).unwrap().is_empty());
}

#[actix_web::test]
async fn schema_is_openapi_and_docs_are_swagger_ui() {
    let app = app!(seeded_store());
    let resp = call!(app, test::TestRequest::get().uri(routes::SCHEMA_PATH));
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["openapi"].as_str().unwrap().starts_with("3."));
    for endpoint in endpoints() {
        let method = endpoint.method.as_str().to_ascii_lowercase();
        assert!(
            body["paths"][endpoint.path][method.as_str()].is_object(),
            "{} {}",
            endpoint.method,
            endpoint.path
        );
    }
    assert_eq!(body["paths"]["/api/segments/"]["post"]["security"][0]["token"], json!([]));

    let resp = call!(app, test::TestRequest::get().uri(routes::DOCS_PATH));
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/html"), "{}", content_type);
}
