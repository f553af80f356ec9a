use crate::error::ApiError;
use crate::preprocess::decode_image;
use crate::soil_model::SoilRecommender;
use crate::waste_model::{CONFIDENCE_THRESHOLD, DEFAULT_SOIL_FEATURES, WasteClassifier, top_class};
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use shared::{ClassifyResponse, NutrientLevels, WasteCategory};
use std::sync::Arc;

/// Immutable handle bundle built once at startup and injected into every
/// handler.
pub struct AppState {
    pub waste: Arc<dyn WasteClassifier>,
    pub soil: Arc<dyn SoilRecommender>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/classify_waste").route(web::post().to(classify_waste)));
}

async fn home() -> HttpResponse {
    HttpResponse::Ok().body(
        "Welcome to the Waste Classification API! Use the /classify_waste endpoint to classify waste.",
    )
}

async fn classify_waste(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let image_data = read_image_field(&mut payload).await?;
    let tensor = decode_image(&image_data)?;

    let (probabilities, nutrients) = state.waste.predict(&tensor, &DEFAULT_SOIL_FEATURES)?;
    log::debug!("waste class predictions: {probabilities:?}");
    log::debug!("nutrient level predictions: {nutrients:?}");

    let (index, confidence) = top_class(&probabilities)
        .ok_or_else(|| ApiError::Inference("empty class distribution".to_string()))?;
    if confidence < CONFIDENCE_THRESHOLD {
        log::info!(
            "top probability {confidence:.3} below threshold {CONFIDENCE_THRESHOLD}, suppressing"
        );
        return Ok(HttpResponse::Ok().json(ClassifyResponse::suppressed()));
    }

    let category = WasteCategory::from_index(index)
        .ok_or_else(|| ApiError::Inference(format!("class index {index} out of range")))?;
    let levels = NutrientLevels::from_vector(&nutrients)
        .ok_or_else(|| ApiError::Inference("nutrient head size mismatch".to_string()))?;
    let best_soil = state.soil.recommend(&levels.to_features());
    log::info!("classified as {category} (confidence {confidence:.3}), best soil: {best_soil}");

    Ok(HttpResponse::Ok().json(ClassifyResponse {
        class: category.to_string(),
        biodegradable: category.is_biodegradable(),
        nutrient_levels: Some(levels),
        best_soil: Some(best_soil),
    }))
}

/// Collects the `image` multipart field. Absent or empty uploads are a
/// client error.
async fn read_image_field(payload: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    let mut image_data = Vec::new();
    let mut found = false;
    while let Ok(Some(mut field)) = payload.try_next().await {
        if field.name() != Some("image") {
            continue;
        }
        found = true;
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
            image_data.extend_from_slice(&data);
        }
    }
    if !found || image_data.is_empty() {
        return Err(ApiError::MissingInput);
    }
    Ok(image_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header;
    use actix_web::{App, test};
    use shared::{NOT_A_WASTE, NUTRIENT_COUNT, NUTRIENT_LABELS, UNKNOWN_SOIL, WASTE_CLASS_COUNT};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tch::Tensor;

    const BOUNDARY: &str = "test-boundary";

    struct FixedClassifier {
        probabilities: Vec<f32>,
        nutrients: Vec<f32>,
        called: Arc<AtomicBool>,
    }

    impl FixedClassifier {
        fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                nutrients: (0..NUTRIENT_COUNT).map(|i| i as f32 + 0.5).collect(),
                called: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl WasteClassifier for FixedClassifier {
        fn predict(
            &self,
            _image: &Tensor,
            _soil_features: &[f32; NUTRIENT_COUNT],
        ) -> Result<(Vec<f32>, Vec<f32>), ApiError> {
            self.called.store(true, Ordering::SeqCst);
            Ok((self.probabilities.clone(), self.nutrients.clone()))
        }
    }

    struct FailingClassifier;

    impl WasteClassifier for FailingClassifier {
        fn predict(
            &self,
            _image: &Tensor,
            _soil_features: &[f32; NUTRIENT_COUNT],
        ) -> Result<(Vec<f32>, Vec<f32>), ApiError> {
            Err(ApiError::Inference("forward pass failed".to_string()))
        }
    }

    struct FixedSoil(&'static str);

    impl SoilRecommender for FixedSoil {
        fn recommend(&self, _nutrients: &[f32; NUTRIENT_COUNT]) -> String {
            self.0.to_string()
        }
    }

    fn confident_probabilities(class_index: usize) -> Vec<f32> {
        let mut probs = vec![0.02; WASTE_CLASS_COUNT];
        probs[class_index] = 0.9;
        probs
    }

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbImage::from_pixel(32, 32, image::Rgb([10, 200, 30]));
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode png");
        buffer.into_inner()
    }

    fn multipart_body(field_name: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field_name}\"; \
                 filename=\"upload.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(field_name: &str, bytes: &[u8]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/classify_waste")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(multipart_body(field_name, bytes))
    }

    fn app_state(
        waste: Arc<dyn WasteClassifier>,
        soil: Arc<dyn SoilRecommender>,
    ) -> web::Data<AppState> {
        web::Data::new(AppState { waste, soil })
    }

    #[actix_web::test]
    async fn home_returns_welcome_text() {
        let state = app_state(
            Arc::new(FixedClassifier::new(confident_probabilities(0))),
            Arc::new(FixedSoil("loamy")),
        );
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let response =
            test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(response.status().is_success());
        let body = test::read_body(response).await;
        assert!(String::from_utf8_lossy(&body).contains("Waste Classification API"));
    }

    #[actix_web::test]
    async fn missing_image_field_is_a_client_error() {
        let state = app_state(
            Arc::new(FixedClassifier::new(confident_probabilities(0))),
            Arc::new(FixedSoil("loamy")),
        );
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("attachment", &png_bytes()).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body, serde_json::json!({"error": "No image file provided"}));
    }

    #[actix_web::test]
    async fn undecodable_image_never_reaches_the_classifier() {
        let classifier = Arc::new(FixedClassifier::new(confident_probabilities(0)));
        let called = classifier.called.clone();
        let state = app_state(classifier, Arc::new(FixedSoil("loamy")));
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("image", b"not an image at all").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 500);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert!(!body["error"].as_str().expect("error message").is_empty());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[actix_web::test]
    async fn below_threshold_is_suppressed() {
        let state = app_state(
            Arc::new(FixedClassifier::new(vec![0.4, 0.3, 0.1, 0.1, 0.05, 0.05])),
            Arc::new(FixedSoil("loamy")),
        );
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("image", &png_bytes()).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({
                "class": NOT_A_WASTE,
                "biodegradable": false,
                "nutrient_levels": null,
                "best_soil": null,
            })
        );
    }

    #[actix_web::test]
    async fn confident_classification_reports_nutrients_and_soil() {
        // Index 3 is paper, a biodegradable category.
        let state = app_state(
            Arc::new(FixedClassifier::new(confident_probabilities(3))),
            Arc::new(FixedSoil("loamy")),
        );
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("image", &png_bytes()).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["class"], "paper");
        assert_eq!(body["biodegradable"], true);
        assert_eq!(body["best_soil"], "loamy");
        let nutrients = body["nutrient_levels"].as_object().expect("object");
        assert_eq!(nutrients.len(), NUTRIENT_COUNT);
        for label in NUTRIENT_LABELS {
            assert!(nutrients[label].is_number(), "missing nutrient {label}");
        }
    }

    #[actix_web::test]
    async fn non_biodegradable_category_is_flagged() {
        // Index 1 is glass.
        let state = app_state(
            Arc::new(FixedClassifier::new(confident_probabilities(1))),
            Arc::new(FixedSoil("sandy")),
        );
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("image", &png_bytes()).to_request();
        let response = test::call_service(&app, request).await;
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["class"], "glass");
        assert_eq!(body["biodegradable"], false);
    }

    #[actix_web::test]
    async fn inference_failure_is_a_server_error() {
        let state = app_state(Arc::new(FailingClassifier), Arc::new(FixedSoil("loamy")));
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("image", &png_bytes()).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 500);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"], "forward pass failed");
    }

    #[actix_web::test]
    async fn degraded_soil_recommendation_still_succeeds() {
        let state = app_state(
            Arc::new(FixedClassifier::new(confident_probabilities(5))),
            Arc::new(FixedSoil(UNKNOWN_SOIL)),
        );
        let app =
            test::init_service(App::new().app_data(state).configure(configure_routes)).await;

        let request = multipart_request("image", &png_bytes()).to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["class"], "trash");
        assert_eq!(body["best_soil"], UNKNOWN_SOIL);
    }
}
