use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use contoso_expenses_storage::Database;
use contoso_expenses_util::ServiceRole;

use crate::submission::ExpenseSubmissionWorkflow;
use crate::{costcenter_api, pages, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    workflow: ExpenseSubmissionWorkflow,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        workflow: ExpenseSubmissionWorkflow,
    ) -> Self {
        Self {
            metrics,
            storage,
            workflow,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn workflow(&self) -> &ExpenseSubmissionWorkflow {
        &self.workflow
    }
}

/// Builds the HTTP surface for `role`. Health and metrics are always served.
pub fn app_router(state: AppState, role: ServiceRole) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics));

    if role.serves_api() {
        router = router.route(
            "/api/costcenter/:email",
            get(costcenter_api::get_cost_center),
        );
    }

    if role.serves_web() {
        router = router
            .route("/", get(pages::index))
            .route("/expenses", get(pages::list_expenses))
            .route(
                "/expenses/create",
                get(pages::create_form).post(pages::submit_expense),
            );
    }

    router.with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::render_metrics(state.metrics()),
    )
}
