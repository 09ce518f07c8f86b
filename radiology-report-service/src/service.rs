use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use report_flow::{
    FlowError, FlowRunner, InMemoryProtocolStore, InMemorySessionStorage, ModelQuestionPolicy,
    PostgresSessionStorage, ProtocolLibrary, QuestionPolicy, Report, Response, RigCompletion,
    SessionStorage, StaticQuestionPolicy, TextCompletion, case_workflow,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServiceConfig,
    models::{AnswerRequest, CaseResponse, StartCaseRequest},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "case_id": id
        })),
    )
}

fn conflict_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": message,
            "case_id": id
        })),
    )
}

fn pipeline_error(message: &str, study_type: &str) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": message,
            "study_type": study_type
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

/// Maps an engine error onto the HTTP surface.
fn flow_error(err: FlowError, case_id: &str, study_type: &str) -> ApiError {
    match &err {
        FlowError::InvalidInput(message) => bad_request_error(message),
        FlowError::Interview(e) => bad_request_error(&e.to_string()),
        FlowError::SessionNotFound(id) => not_found_error("Case not found", id),
        FlowError::NoProtocolData { study_type } => pipeline_error(&err.to_string(), study_type),
        FlowError::ChecklistGeneration(_) => pipeline_error(&err.to_string(), study_type),
        _ => {
            error!(case_id, error = %err, "Case step failed");
            internal_error("Case step failed", &err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub flow_runner: FlowRunner,
    pub study_types: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(flow_runner: FlowRunner, study_types: Vec<String>) -> Self {
        Self {
            flow_runner,
            study_types: Arc::new(study_types),
        }
    }
}

pub async fn create_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let app_state = create_app_state(config).await?;
    Ok(build_router(app_state))
}

async fn create_app_state(config: &ServiceConfig) -> anyhow::Result<AppState> {
    let library = ProtocolLibrary::load(&config.protocol_library).await?;
    let protocols = Arc::new(InMemoryProtocolStore::from_library(&library));
    let study_types = protocols.study_types();

    let model: Arc<dyn TextCompletion> = Arc::new(RigCompletion::new(
        &config.api_key,
        config.model.clone(),
        config.temperature,
    ));
    let policy: Arc<dyn QuestionPolicy> = if config.static_questions() {
        info!("Question refinement and follow-ups disabled");
        Arc::new(StaticQuestionPolicy)
    } else {
        Arc::new(
            ModelQuestionPolicy::new(model.clone())
                .with_refinement(config.refine_questions)
                .with_follow_ups(config.dynamic_follow_ups),
        )
    };

    let workflow = case_workflow(model, protocols, policy, library.techniques);
    let session_storage = create_session_storage(config.database_url.as_deref()).await;
    let flow_runner = FlowRunner::new(Arc::new(workflow), session_storage);

    Ok(AppState::new(flow_runner, study_types))
}

async fn create_session_storage(database_url: Option<&str>) -> Arc<dyn SessionStorage> {
    let Some(database_url) = database_url else {
        info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
        return Arc::new(InMemorySessionStorage::new());
    };

    info!("Using PostgreSQL session storage");
    match PostgresSessionStorage::connect(database_url).await {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            );
            Arc::new(InMemorySessionStorage::new())
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/cases", post(start_case))
        .route("/cases/{case_id}", get(get_case))
        .route("/cases/{case_id}/answer", post(answer_question))
        .route("/cases/{case_id}/reset", post(reset_case))
        .route("/cases/{case_id}/report", get(get_report))
        .route("/cases/{case_id}/report/text", get(get_report_text))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
        .with_state(app_state)
}

/// Tags every request with a correlation id, both in its tracing span and in
/// the `x-correlation-id` response header.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header_value = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = &header_value {
        request.headers_mut().insert("x-correlation-id", value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header_value {
        response.headers_mut().insert("x-correlation-id", value);
    }
    response
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "Radiology Report Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Checklist-driven radiology reporting with a question-by-question interview",
        "study_types": state.study_types.as_ref(),
        "endpoints": {
            "POST /cases": "Start a case and get the first question",
            "GET /cases/{case_id}": "Case status, current question and progress",
            "POST /cases/{case_id}/answer": "Answer the current question (Yes/No with details)",
            "POST /cases/{case_id}/reset": "Restart the interview from the compiled questions",
            "GET /cases/{case_id}/report": "Structured report",
            "GET /cases/{case_id}/report/text": "Markdown report",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn start_case(
    State(state): State<AppState>,
    Json(request): Json<StartCaseRequest>,
) -> ApiResult<CaseResponse> {
    let case = request.into_case();
    let (case_id, study_type) = (case.case_id.clone(), case.study_type.clone());
    info!(case_id = %case_id, study_type = %study_type, "Starting case");

    let (session, result) = state
        .flow_runner
        .start(case)
        .await
        .map_err(|e| flow_error(e, &case_id, &study_type))?;

    Ok(Json(CaseResponse::from_session(&session, result.response)))
}

async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<CaseResponse> {
    let session = state
        .flow_runner
        .load(&case_id)
        .await
        .map_err(|e| flow_error(e, &case_id, ""))?;

    Ok(Json(CaseResponse::from_session(&session, None)))
}

async fn answer_question(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> ApiResult<CaseResponse> {
    let response: Response = request
        .response
        .parse()
        .map_err(|e: String| bad_request_error(&e))?;
    info!(case_id = %case_id, response = ?response, "Answer received");

    let result = state
        .flow_runner
        .submit_answer(&case_id, response, request.details)
        .await
        .map_err(|e| flow_error(e, &case_id, ""))?;
    let session = state
        .flow_runner
        .load(&case_id)
        .await
        .map_err(|e| flow_error(e, &case_id, ""))?;

    Ok(Json(CaseResponse::from_session(&session, result.response)))
}

async fn reset_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<CaseResponse> {
    info!(case_id = %case_id, "Resetting interview");

    let result = state
        .flow_runner
        .reset(&case_id)
        .await
        .map_err(|e| flow_error(e, &case_id, ""))?;
    let session = state
        .flow_runner
        .load(&case_id)
        .await
        .map_err(|e| flow_error(e, &case_id, ""))?;

    Ok(Json(CaseResponse::from_session(&session, result.response)))
}

async fn load_report(state: &AppState, case_id: &str) -> Result<Report, ApiError> {
    let session = state
        .flow_runner
        .load(case_id)
        .await
        .map_err(|e| flow_error(e, case_id, ""))?;

    session.report.ok_or_else(|| {
        warn!(case_id, "Report requested before the interview finished");
        conflict_error("Report not ready", case_id)
    })
}

async fn get_report(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<Report> {
    load_report(&state, &case_id).await.map(Json)
}

async fn get_report_text(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = load_report(&state, &case_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        report.to_markdown(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use report_flow::{ModelCallError, prompts};
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    const CHECKLIST: &str = r#"{"checklist": [
      {"category": "Lungs", "subcategories": [{"name": "Parenchyma", "items": ["nodules"]}]}
    ]}"#;

    struct FakeModel;

    #[async_trait]
    impl TextCompletion for FakeModel {
        async fn invoke(
            &self,
            system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, ModelCallError> {
            let reply = match system_prompt {
                p if p == prompts::CHECKLIST_SYSTEM_PROMPT => CHECKLIST,
                p if p == prompts::QUESTION_PHRASING_SYSTEM_PROMPT => {
                    r#"[{"id": "specific_0_0", "question": "Are there pulmonary nodules?"}]"#
                }
                p if p == prompts::OBSERVATIONS_SYSTEM_PROMPT => {
                    "LUNGS:\nA 4 mm nodule is seen in the right upper lobe. Rest of the parenchyma appears normal."
                }
                p if p == prompts::IMPRESSION_SYSTEM_PROMPT => "Right upper lobe pulmonary nodule.",
                _ => return Err(ModelCallError::new("unexpected prompt")),
            };
            Ok(reply.to_string())
        }
    }

    fn app() -> Router {
        let protocols = InMemoryProtocolStore::new();
        protocols.insert("ct_chest", vec!["Lungs: nodules, consolidation.".to_string()]);
        let study_types = protocols.study_types();
        let workflow = case_workflow(
            Arc::new(FakeModel),
            Arc::new(protocols),
            Arc::new(StaticQuestionPolicy),
            BTreeMap::new(),
        );
        let runner = FlowRunner::new(Arc::new(workflow), Arc::new(InMemorySessionStorage::new()));
        build_router(AppState::new(runner, study_types))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ));
        (status, value)
    }

    fn start_body(case_id: &str, study_type: &str) -> Value {
        json!({
            "case_id": case_id,
            "age": "61",
            "gender": "Female",
            "clinical_history": "Chronic cough",
            "study_type": study_type
        })
    }

    #[tokio::test]
    async fn case_runs_from_first_question_to_report() {
        let app = app();

        let start = Some(start_body("case_http", "ct_chest"));
        let (status, body) = send(&app, "POST", "/cases", start).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "waiting_for_input");
        assert_eq!(body["current_question"]["id"], "screening_0");
        assert_eq!(body["progress"]["visible_total"], 1);

        let (status, _) = send(&app, "GET", "/cases/case_http/report", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app,
            "POST",
            "/cases/case_http/answer",
            Some(json!({"response": "Yes"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_question"]["id"], "specific_0_0");
        assert_eq!(body["current_question"]["type"], "specific");
        assert!(body["current_question"]["follow_up"].is_string());

        let (status, body) = send(
            &app,
            "POST",
            "/cases/case_http/answer",
            Some(json!({"response": "yes", "details": "4 mm nodule in the right upper lobe"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["report_ready"], true);
        assert_eq!(body["summary"]["positive_findings"], 2);

        let (status, report) = send(&app, "GET", "/cases/case_http/report", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["report"]["impression"], "Right upper lobe pulmonary nodule.");

        let (status, text) = send(&app, "GET", "/cases/case_http/report/text", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.as_str().unwrap().starts_with("# RADIOLOGY REPORT"));

        let (status, _) = send(
            &app,
            "POST",
            "/cases/case_http/answer",
            Some(json!({"response": "No"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_answers_are_rejected_without_advancing() {
        let app = app();
        send(&app, "POST", "/cases", Some(start_body("case_bad", "ct_chest"))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/cases/case_bad/answer",
            Some(json!({"response": "maybe"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("maybe"));

        let (_, body) = send(&app, "GET", "/cases/case_bad", None).await;
        assert_eq!(body["current_question"]["id"], "screening_0");
    }

    #[tokio::test]
    async fn reset_returns_to_the_first_question() {
        let app = app();
        send(&app, "POST", "/cases", Some(start_body("case_reset", "ct_chest"))).await;
        send(
            &app,
            "POST",
            "/cases/case_reset/answer",
            Some(json!({"response": "Yes"})),
        )
        .await;

        let (status, body) = send(&app, "POST", "/cases/case_reset/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_question"]["id"], "screening_0");
        assert_eq!(body["summary"]["answered"], 0);
    }

    #[tokio::test]
    async fn error_statuses_follow_the_failure_kind() {
        let app = app();

        let start = Some(start_body("case_knee", "mri_knee"));
        let (status, body) = send(&app, "POST", "/cases", start).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["study_type"], "mri_knee");

        let (status, body) = send(&app, "GET", "/cases/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["case_id"], "unknown");

        let mut blank = start_body("case_blank", "ct_chest");
        blank["clinical_history"] = json!("  ");
        let (status, _) = send(&app, "POST", "/cases", Some(blank)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn root_lists_supported_study_types() {
        let (status, body) = send(&app(), "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["study_types"], json!(["ct_chest"]));
    }
}
