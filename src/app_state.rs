use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{
    auth::JwtValidator, gateway::JobGateway, queue::Broker, result_store::ResultStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: JobGateway,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn ResultStore>,
    /// Job sources and the raw scrape archive. Those routes answer 503 without it.
    pub db: Option<PgPool>,
    /// Bearer-token validation; mutating routes are open when unset.
    pub auth: Option<Arc<JwtValidator>>,
}

impl AppState {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn ResultStore>,
        db: Option<PgPool>,
        jwt_secret: Option<&str>,
    ) -> Self {
        Self {
            gateway: JobGateway::new(broker.clone(), store.clone()),
            broker,
            store,
            db,
            auth: jwt_secret.map(|secret| Arc::new(JwtValidator::new(secret))),
        }
    }
}
