use std::sync::Arc;

use crate::settings::Settings;
use crate::tasks::scheduler::TaskSpawner;

/// Shared app state handed to every handler via `actix_web::web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub spawner: Arc<dyn TaskSpawner>,
    pub settings: Arc<Settings>,
}
