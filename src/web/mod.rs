/// HTTP façade: the `/k8s/*` task-submission endpoints. Thin by design —
/// every handler parses its form fields, loads/authenticates a `Cnf`, hands
/// off to the task scheduler, and maps the result through the same
/// domain-vs-opaque error split the rest of the system uses.
pub mod handlers;
pub mod state;

use actix_web::{middleware, web::Data, App, HttpServer};

use crate::error::Result;
use state::AppState;

pub async fn start_server(state: AppState) -> Result<()> {
    let bind = state.settings.http_bind.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/"))
            .service(handlers::health)
            .service(handlers::task_status)
            .service(handlers::create_cluster)
            .service(handlers::update_cluster)
            .service(handlers::create_nodepool)
            .service(handlers::update_nodepool)
            .service(handlers::create_node)
            .service(handlers::update_node)
            .service(handlers::status)
            .service(handlers::kubeconfig)
    })
    .bind(&bind)
    .map_err(crate::error::ControlPlaneError::Io)?
    .shutdown_timeout(5);

    server.run().await.map_err(crate::error::ControlPlaneError::Io)
}
