use axum::{
    extract::{Path, State},
    Json,
};
use metrics::counter;
use tracing::{error, info};

use contoso_expenses_core::CostCenterRecord;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// `GET /api/costcenter/:email`
pub async fn get_cost_center(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<CostCenterRecord>, ProblemResponse> {
    let instance = format!("/api/costcenter/{email}");
    match state.storage().cost_centers().fetch(email.trim()).await {
        Ok(Some(record)) => {
            counter!("api_cost_center_requests_total", "result" => "found").increment(1);
            info!(
                stage = "api",
                submitter_email = %record.submitter_email,
                cost_center = %record.cost_center_name,
                "cost center served"
            );
            Ok(Json(record))
        }
        Ok(None) => {
            counter!("api_cost_center_requests_total", "result" => "not_found").increment(1);
            info!(stage = "api", submitter_email = %email, "cost center not found");
            Err(ProblemResponse::not_found(
                "cost_center_not_found",
                format!("no cost center is registered for {email}"),
            )
            .with_instance(instance))
        }
        Err(err) => {
            counter!("api_cost_center_requests_total", "result" => "error").increment(1);
            error!(stage = "api", submitter_email = %email, error = %err, "cost center query failed");
            Err(ProblemResponse::internal(
                "cost_center_lookup_failed",
                "failed to read the cost center directory",
            )
            .with_instance(instance))
        }
    }
}
