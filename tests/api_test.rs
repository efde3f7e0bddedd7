//! Image classification, record and health endpoints over memory storage.

mod common;

use axum::http::{header, StatusCode};
use common::*;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_health_reports_connected_store() {
    let app = TestApp::new();

    for path in ["/", "/health"] {
        let (status, body) = app.get_json(path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "connected");
        assert!(body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn test_classify_rejects_non_image() {
    let app = TestApp::new();

    let (status, body) = app
        .post_multipart(
            "/api/classify",
            &[Part::File {
                name: "file",
                filename: "notes.txt",
                content_type: "text/plain",
                bytes: b"not an image",
            }],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["detail"].as_str().unwrap().contains("image"));
}

#[tokio::test]
async fn test_classify_requires_file() {
    let app = TestApp::new();

    let (status, body) = app
        .post_multipart("/api/classify", &[Part::Field("latitude", "10.0")])
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "No file uploaded");
}

#[tokio::test]
async fn test_classify_rejects_out_of_range_latitude() {
    let app = TestApp::new();
    let png = black_png();

    let (status, body) = app
        .post_multipart(
            "/api/classify",
            &[
                Part::File {
                    name: "file",
                    filename: "flower.png",
                    content_type: "image/png",
                    bytes: &png,
                },
                Part::Field("latitude", "95.0"),
                Part::Field("longitude", "10.0"),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_image_classification_lifecycle() {
    let app = TestApp::new();
    let png = black_png();

    let (status, created) = app
        .post_multipart(
            "/api/classify",
            &[
                Part::File {
                    name: "file",
                    filename: "flower.png",
                    content_type: "image/png",
                    bytes: &png,
                },
                Part::Field("latitude", "37.5"),
                Part::Field("longitude", "-122.25"),
            ],
        )
        .await;

    assert_eq!(status, StatusCode::OK, "classify failed: {created}");
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["image_path"], format!("/api/images/{id}"));
    assert_eq!(created["flower_count"], 1);
    assert_eq!(created["stage_summary"], json!({"0": 1, "1": 0, "2": 0}));
    assert_eq!(created["location"]["latitude"], 37.5);
    assert_eq!(created["flowers"][0]["stage"], 0);

    // Stored record matches the response
    let (status, fetched) = app.get_json(&format!("/api/classifications/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["flowers"], created["flowers"]);

    // Annotated image is served as JPEG
    let response = app.get(&format!("/api/images/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = body_bytes(response).await;
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);

    let (_, heatmap) = app.get_json("/api/heatmap-data").await;
    assert_eq!(heatmap["total_records"], 1);
    assert_eq!(heatmap["data_points"][0]["total_flowers"], 1);
    assert_eq!(heatmap["data_points"][0]["longitude"], -122.25);

    let (_, stats) = app.get_json("/api/stats").await;
    assert_eq!(stats["image_records"], 1);
    assert_eq!(stats["video_records"], 0);

    let (status, deleted) = app.delete_json(&format!("/api/classifications/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["message"], "Classification deleted successfully");

    let (status, _) = app.get_json(&format!("/api/classifications/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let response = app.get(&format!("/api/images/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (_, heatmap) = app.get_json("/api/heatmap-data").await;
    assert_eq!(heatmap["total_records"], 0);
}

#[tokio::test]
async fn test_unknown_ids_return_not_found() {
    let app = TestApp::new();
    let id = Uuid::new_v4();

    let (status, body) = app.get_json(&format!("/api/classifications/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = app.delete_json(&format!("/api/classifications/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get_json(&format!("/api/jobs/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete_json(&format!("/api/jobs/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete_json(&format!("/api/video-classifications/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = app.get(&format!("/api/videos/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_demo_latest_video_without_records() {
    let app = TestApp::new();

    let (status, body) = app.get_json("/api/demo/latest-video").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "No video classifications available");
}
