use std::io::Cursor;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    routing::{get, post},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use easel_core::{
    FieldRange, GenerationRequest, Loader, GUIDANCE_SCALE, HEIGHT, INFERENCE_STEPS, WIDTH,
};
use image::DynamicImage;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{error::ApiError, state::AppState, ui};

#[derive(Serialize)]
struct InfoResponse {
    message: &'static str,
    status: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
}

#[derive(Serialize)]
struct GenerationResponse {
    image: Option<String>,
    message: String,
    filename: Option<String>,
}

#[derive(Serialize)]
struct ClearResponse {
    message: &'static str,
}

/// Build the router: JSON endpoints plus the UI on every other GET path.
pub fn create_router<L: Loader>(state: AppState<L>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health::<L>))
        .route("/api/generate", post(generate_image_handler::<L>))
        .route("/api/clear", post(clear_model_handler::<L>))
        .fallback(get(ui::index))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<InfoResponse> {
    Json(InfoResponse {
        message: "AI Image Generator API",
        status: "running",
    })
}

async fn health<L: Loader>(State(state): State<AppState<L>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.generator.is_loaded().await,
    })
}

async fn generate_image_handler<L: Loader>(
    State(state): State<AppState<L>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    validate(&req)?;

    let result = state.generator.generate(req).await;
    let image = result
        .image()
        .map(image_to_base64_png)
        .transpose()
        .map_err(|e| {
            error!("Error encoding image: {e:?}");
            ApiError::internal(format!("failed to encode image: {e}"))
        })?;

    Ok(Json(GenerationResponse {
        image,
        message: result.message(),
        filename: result.artifact().map(|artifact| artifact.filename.clone()),
    }))
}

async fn clear_model_handler<L: Loader>(State(state): State<AppState<L>>) -> Json<ClearResponse> {
    let status = state.generator.clear().await;
    Json(ClearResponse {
        message: status.message(),
    })
}

/// Rejects what the UI widgets would never send.
fn validate(req: &GenerationRequest) -> Result<(), ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    check_range("guidance_scale", req.guidance_scale, GUIDANCE_SCALE)?;
    check_range("inference_steps", req.inference_steps as f64, INFERENCE_STEPS)?;
    check_range("width", req.width as f64, WIDTH)?;
    check_range("height", req.height as f64, HEIGHT)
}

fn check_range(field: &str, value: f64, range: FieldRange) -> Result<(), ApiError> {
    if range.contains(value) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "{field} must be between {} and {}, got {value}",
            range.min, range.max
        )))
    }
}

fn image_to_base64_png(img: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use easel_core::{ArtifactStore, Device, Generator, ModelLike};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    struct SolidModel {
        device: Device,
    }

    impl ModelLike for SolidModel {
        fn run(&self, request: GenerationRequest) -> Result<DynamicImage> {
            if request.width % 8 != 0 {
                anyhow::bail!("width {} is not divisible by 8", request.width);
            }
            Ok(DynamicImage::new_rgb8(
                request.width as u32,
                request.height as u32,
            ))
        }

        fn device(&self) -> &Device {
            &self.device
        }
    }

    #[derive(Clone, Default)]
    struct SwitchLoader {
        missing_weights: Arc<AtomicBool>,
    }

    impl Loader for SwitchLoader {
        type Model = SolidModel;

        async fn load(&self) -> Result<SolidModel> {
            if self.missing_weights.load(Ordering::SeqCst) {
                anyhow::bail!("unet/diffusion_pytorch_model.safetensors not found");
            }
            Ok(SolidModel {
                device: Device::Cpu,
            })
        }
    }

    fn app(loader: SwitchLoader, dir: &std::path::Path) -> Router {
        let generator = Generator::new(loader, ArtifactStore::new(dir.join("generated_images")));
        create_router(AppState::new(generator))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn root_reports_running() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let (status, body) = send(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"message": "AI Image Generator API", "status": "running"})
        );
    }

    #[tokio::test]
    async fn health_flips_after_first_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let (_, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(body, json!({"status": "healthy", "model_loaded": false}));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({"prompt": "A red cube on a white background"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().starts_with("✅"));
        assert!(body["image"].as_str().is_some_and(|image| !image.is_empty()));
        let filename = body["filename"].as_str().unwrap();
        assert!(tmp.path().join("generated_images").join(filename).is_file());

        let (_, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(body, json!({"status": "healthy", "model_loaded": true}));
    }

    #[tokio::test]
    async fn missing_weights_surface_as_message() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = SwitchLoader::default();
        loader.missing_weights.store(true, Ordering::SeqCst);
        let app = app(loader, tmp.path());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({"prompt": "A red cube on a white background"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image"], Value::Null);
        assert_eq!(body["filename"], Value::Null);
        assert!(body["message"].as_str().unwrap().starts_with("Error"));

        let (_, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(body["model_loaded"], json!(false));
    }

    #[tokio::test]
    async fn inference_failure_surfaces_as_message() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({"prompt": "odd", "width": 300})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["image"], Value::Null);
        assert_eq!(
            body["message"],
            json!("❌ Error generating image: width 300 is not divisible by 8")
        );
    }

    #[tokio::test]
    async fn out_of_range_fields_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({"prompt": "a", "width": 2048})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"]["message"],
            json!("width must be between 256 and 1024, got 2048")
        );

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({"prompt": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_bodies_get_a_json_error() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/generate",
            Some(json!({"prompt": "a", "width": -512})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/generate")
            .body(Body::from(json!({"prompt": "a"}).to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], json!("invalid_request_error"));
        assert!(!tmp.path().join("generated_images").exists());
    }

    #[tokio::test]
    async fn clear_reports_status_and_unloads() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let (status, body) = send(&app, Method::POST, "/api/clear", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"message": "🗑️ Model cleared from memory"}));

        send(&app, Method::POST, "/api/generate", Some(json!({"prompt": "a"}))).await;
        send(&app, Method::POST, "/api/clear", None).await;
        let (_, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(body["model_loaded"], json!(false));
    }

    #[tokio::test]
    async fn other_paths_serve_the_ui() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(SwitchLoader::default(), tmp.path());

        let request = Request::builder()
            .uri("/gradio/app")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(page.contains("🎨 Generate Image"));
    }
}
