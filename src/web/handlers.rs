/// `/k8s/*` task-submission endpoints. Each handler does the minimum: pull
/// credentials off the request, load/validate the submitted config, enqueue
/// (or look up) a task, and hand the result back as pretty-printed JSON.
use actix_web::{get, post, web::Data, web::Form, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use tracing::error;

use crate::config::Cnf;
use crate::error::ControlPlaneError;
use crate::tasks::registry::TaskOp;
use crate::tasks::TaskId;

use super::state::AppState;

fn pretty_json(value: &impl serde::Serialize) -> HttpResponse {
    match serde_json::to_string_pretty(value) {
        Ok(body) => HttpResponse::Ok().content_type("application/json").body(body),
        Err(_) => error_response(&ControlPlaneError::Opaque),
    }
}

/// Distinct from the task-envelope's own opaque string (`ControlPlaneError::Opaque`'s
/// message) — this one masks non-domain errors specifically at the HTTP boundary.
const HTTP_OPAQUE_MESSAGE: &str = "Internal Server Error. Please try again later.";

/// The error response shape every handler falls back to: domain errors leak
/// their message, anything else is masked with the stock opaque message.
fn error_response(err: &ControlPlaneError) -> HttpResponse {
    error!("request failed: {err:?}");
    let message = if err.is_domain() {
        err.to_string()
    } else {
        HTTP_OPAQUE_MESSAGE.to_string()
    };
    HttpResponse::InternalServerError()
        .content_type("application/json")
        .body(serde_json::json!({ "message": message }).to_string())
}

fn extract_creds(req: &HttpRequest) -> Result<(String, String), ControlPlaneError> {
    let client_id = req
        .headers()
        .get("AuthClientId")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlPlaneError::Auth("AuthClientId header is required".into()))?;
    let secret = req
        .headers()
        .get("AuthSecret")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlPlaneError::Auth("AuthSecret header is required".into()))?;
    Ok((client_id.to_string(), secret.to_string()))
}

fn load_cnf(req: &HttpRequest, kconfig: &str) -> Result<Cnf, ControlPlaneError> {
    let creds = extract_creds(req)?;
    Cnf::load_with_creds(kconfig, creds)
}

#[get("/")]
pub async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "ok": true }))
}

#[derive(Deserialize)]
pub struct TaskStatusForm {
    task_id: String,
}

#[post("/k8s/task_status")]
pub async fn task_status(
    state: Data<AppState>,
    req: HttpRequest,
    form: Form<TaskStatusForm>,
) -> impl Responder {
    let creds = match extract_creds(&req) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    let task_id: TaskId = match form.task_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return error_response(&ControlPlaneError::NotFound(format!(
                "no such task: {}",
                form.task_id
            )))
        }
    };
    match state.spawner.get_status(task_id, &creds).await {
        Ok(status) => pretty_json(&status),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub struct ClusterForm {
    kconfig: String,
}

async fn enqueue(state: &AppState, cnf: Cnf, op: TaskOp) -> HttpResponse {
    match state.spawner.enqueue(op, cnf).await {
        Ok(task_id) => pretty_json(&serde_json::json!({ "task_id": task_id.to_string() })),
        Err(e) => error_response(&e),
    }
}

#[post("/k8s/create_cluster")]
pub async fn create_cluster(state: Data<AppState>, req: HttpRequest, form: Form<ClusterForm>) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => enqueue(&state, cnf, TaskOp::CreateCluster).await,
        Err(e) => error_response(&e),
    }
}

#[post("/k8s/update_cluster")]
pub async fn update_cluster(state: Data<AppState>, req: HttpRequest, form: Form<ClusterForm>) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => enqueue(&state, cnf, TaskOp::UpdateCluster).await,
        Err(e) => error_response(&e),
    }
}

#[post("/k8s/status")]
pub async fn status(state: Data<AppState>, req: HttpRequest, form: Form<ClusterForm>) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => enqueue(&state, cnf, TaskOp::GetClusterStatus).await,
        Err(e) => error_response(&e),
    }
}

#[post("/k8s/kubeconfig")]
pub async fn kubeconfig(state: Data<AppState>, req: HttpRequest, form: Form<ClusterForm>) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => enqueue(&state, cnf, TaskOp::GetKubeconfig).await,
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub struct NodepoolForm {
    kconfig: String,
    nodepool_name: String,
}

#[post("/k8s/create_nodepool")]
pub async fn create_nodepool(
    state: Data<AppState>,
    req: HttpRequest,
    form: Form<NodepoolForm>,
) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => {
            let op = TaskOp::CreateNodepool {
                pool_name: form.nodepool_name.clone(),
            };
            enqueue(&state, cnf, op).await
        }
        Err(e) => error_response(&e),
    }
}

#[post("/k8s/update_nodepool")]
pub async fn update_nodepool(
    state: Data<AppState>,
    req: HttpRequest,
    form: Form<NodepoolForm>,
) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => {
            let op = TaskOp::UpdateNodepool {
                pool_name: form.nodepool_name.clone(),
            };
            enqueue(&state, cnf, op).await
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub struct NodeForm {
    kconfig: String,
    nodepool_name: String,
    node_number: u32,
}

#[post("/k8s/create_node")]
pub async fn create_node(state: Data<AppState>, req: HttpRequest, form: Form<NodeForm>) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => {
            let op = TaskOp::CreateNode {
                pool_name: form.nodepool_name.clone(),
                node_number: form.node_number,
            };
            enqueue(&state, cnf, op).await
        }
        Err(e) => error_response(&e),
    }
}

#[post("/k8s/update_node")]
pub async fn update_node(state: Data<AppState>, req: HttpRequest, form: Form<NodeForm>) -> impl Responder {
    match load_cnf(&req, &form.kconfig) {
        Ok(cnf) => {
            let op = TaskOp::UpdateNode {
                pool_name: form.nodepool_name.clone(),
                node_number: form.node_number,
            };
            enqueue(&state, cnf, op).await
        }
        Err(e) => error_response(&e),
    }
}
