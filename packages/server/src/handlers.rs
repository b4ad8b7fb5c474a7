//! HTTP handler functions for the erosion map API.

use actix_web::{HttpResponse, web};
use chrono::{Datelike as _, NaiveDate, Utc, Weekday};
use erosion_map_predict::PredictError;
use erosion_map_predict_models::PointQuery;
use erosion_map_rusle::{DEFAULT_MAX_GRID_DIM, MAX_THRESHOLD_T_HA_YR};
use erosion_map_rusle_models::{Factor, FactorSet, MAX_DATE_RANGE_DAYS};
use erosion_map_server_models::{
    ApiHealth, ErrorResponse, FactorInfo, FactorsInfo, LimitsInfo, PredictCarbonRequest,
    PredictCropYieldRequest, RusleRequest,
};

use crate::service::{AnalysisError, AnalysisService};

/// `GET /api/health`
pub async fn health(service: web::Data<AnalysisService>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        carbon_model_loaded: service.carbon_available(),
        crop_model_loaded: service.crop_yield_available(),
    })
}

/// `GET /api/factors`
///
/// Describes the five factors and where their inputs come from.
pub async fn factors() -> HttpResponse {
    let factors = FactorSet::from_fn(|factor| FactorInfo {
        name: factor.name().to_string(),
        unit: factor.unit().to_string(),
        source: factor_source(factor).to_string(),
    });

    HttpResponse::Ok().json(FactorsInfo {
        factors,
        equation: "A = R × K × LS × C × P".to_string(),
        output_unit: "t/ha/yr".to_string(),
    })
}

const fn factor_source(factor: Factor) -> &'static str {
    match factor {
        Factor::R => "Open-Meteo ERA5 archive precipitation (Renard & Freimund 1994)",
        Factor::K => "SoilGrids texture (Williams 1995) or regional defaults",
        Factor::Ls => "Open-Meteo elevation (Moore & Burch 1986)",
        Factor::C => "Sentinel-2 L2A NDVI (Van der Knijff 1999)",
        Factor::P => "User option: 1.0, or contour farming by slope",
    }
}

/// `GET /api/limits`
pub async fn limits(service: web::Data<AnalysisService>) -> HttpResponse {
    let limits = service.limits();

    HttpResponse::Ok().json(LimitsInfo {
        max_vertices: limits.max_vertices,
        min_polygon_area_km2: limits.min_area_km2,
        max_polygon_area_km2: limits.max_area_km2,
        max_aspect_ratio: limits.max_aspect_ratio,
        max_date_range_days: MAX_DATE_RANGE_DAYS,
        max_threshold_t_ha_yr: MAX_THRESHOLD_T_HA_YR,
        max_grid_dim: DEFAULT_MAX_GRID_DIM,
        computation_timeout_sec: service.rusle_timeout().as_secs(),
        predictor_timeout_sec: service.predictor_timeout().as_secs(),
    })
}

/// `POST /api/rusle`
///
/// Runs a full soil-loss analysis with point predictions at the centroid.
pub async fn rusle(
    service: web::Data<AnalysisService>,
    body: web::Json<RusleRequest>,
) -> Result<HttpResponse, AnalysisError> {
    let result = service.analyze(body.into_inner()).await.inspect_err(|e| {
        log::warn!("Analysis rejected: {e}");
    })?;

    Ok(HttpResponse::Ok().json(result))
}

/// `POST /api/predict/carbon`
pub async fn predict_carbon(
    service: web::Data<AnalysisService>,
    body: web::Json<PredictCarbonRequest>,
) -> HttpResponse {
    let PredictCarbonRequest {
        latitude,
        longitude,
    } = body.into_inner();

    if let Err(response) = check_point(latitude, longitude) {
        return response;
    }

    let query = PointQuery::new(latitude, longitude, Utc::now().date_naive());
    match service.predict_carbon(&query).await {
        Ok(prediction) => HttpResponse::Ok().json(prediction),
        Err(e) => prediction_failed("carbon", &e),
    }
}

/// `POST /api/predict/crop-yield`
pub async fn predict_crop_yield(
    service: web::Data<AnalysisService>,
    body: web::Json<PredictCropYieldRequest>,
) -> HttpResponse {
    let request = body.into_inner();

    if let Err(response) = check_point(request.latitude, request.longitude) {
        return response;
    }

    let date = match request.week {
        Some(week) => {
            let Some(date) = week_date(Utc::now().year(), week) else {
                return HttpResponse::BadRequest().json(ErrorResponse::new(
                    "InvalidOptions",
                    format!("week {week} is not an ISO week of the current year"),
                ));
            };
            date
        }
        None => request.date.unwrap_or_else(|| Utc::now().date_naive()),
    };

    let query = PointQuery {
        latitude: request.latitude,
        longitude: request.longitude,
        date,
        crop: request.crop,
    };

    match service.predict_crop_yield(&query).await {
        Ok(prediction) => HttpResponse::Ok().json(prediction),
        Err(e) => prediction_failed("crop yield", &e),
    }
}

/// Wednesday of ISO `week` in `year`, so the ISO week round-trips.
fn week_date(year: i32, week: u32) -> Option<NaiveDate> {
    NaiveDate::from_isoywd_opt(year, week, Weekday::Wed)
}

fn check_point(latitude: f64, longitude: f64) -> Result<(), HttpResponse> {
    if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
        Ok(())
    } else {
        Err(HttpResponse::BadRequest().json(ErrorResponse::new(
            "InvalidCoordinates",
            format!("({latitude}, {longitude}) is outside the valid latitude/longitude range"),
        )))
    }
}

fn prediction_failed(what: &str, e: &PredictError) -> HttpResponse {
    log::error!("{what} prediction failed: {e}");
    let body = ErrorResponse::new("PredictorError", e.to_string());
    match e {
        PredictError::ModelUnavailable { .. } => HttpResponse::ServiceUnavailable().json(body),
        PredictError::Timeout { .. } => HttpResponse::GatewayTimeout().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{service, square};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use chrono::Datelike as _;

    macro_rules! app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($service))
                    .service(crate::api_scope()),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn rusle_returns_analysis() {
        let app = app!(service(0.0, false, false));
        let req = test::TestRequest::post()
            .uri("/api/rusle")
            .set_json(serde_json::json!({
                "coordinates": square(),
                "options": { "threshold_t_ha_yr": 20.0, "p_toggle": false }
            }))
            .to_request();

        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["polygon"]["type"], "Feature");
        assert!(body["factors"]["LS"]["mean"].is_number());
        assert!(body["predictions"]["carbon_sequestration"]["result"].is_object());
        assert!(body["predictions"]["crop_yield"]["error"].is_string());
        assert!(body["location"].is_null());
    }

    #[actix_web::test]
    async fn two_vertex_polygon_is_bad_request() {
        let app = app!(service(0.5, false, false));
        let req = test::TestRequest::post()
            .uri("/api/rusle")
            .set_json(serde_json::json!({
                "coordinates": [
                    { "longitude": -1.26, "latitude": 51.74 },
                    { "longitude": -1.25, "latitude": 51.75 }
                ]
            }))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "InvalidGeometry");
    }

    #[actix_web::test]
    async fn carbon_endpoint_maps_missing_model_to_503() {
        let app = app!(service(0.5, false, true));
        let req = test::TestRequest::post()
            .uri("/api/predict/carbon")
            .set_json(serde_json::json!({ "latitude": 51.75, "longitude": -1.25 }))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn carbon_endpoint_rejects_bad_latitude() {
        let app = app!(service(0.5, false, false));
        let req = test::TestRequest::post()
            .uri("/api/predict/carbon")
            .set_json(serde_json::json!({ "latitude": 95.0, "longitude": 0.0 }))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn factors_and_limits() {
        let app = app!(service(0.5, false, false));

        let req = test::TestRequest::get().uri("/api/factors").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["factors"]["K"]["name"], "Soil Erodibility");
        assert_eq!(body["equation"], "A = R × K × LS × C × P");

        let req = test::TestRequest::get().uri("/api/limits").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["max_vertices"], 1000);
        assert_eq!(body["max_date_range_days"], 730);
    }

    #[actix_web::test]
    async fn health_reports_models() {
        let app = app!(service(0.5, false, true));
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["carbon_model_loaded"], false);
        assert_eq!(body["crop_model_loaded"], true);
    }

    #[::core::prelude::v1::test]
    fn week_date_round_trips() {
        let date = week_date(2025, 21).unwrap();
        assert_eq!(date.iso_week().week(), 21);
        assert!(week_date(2025, 60).is_none());
    }
}
