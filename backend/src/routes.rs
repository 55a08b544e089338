use crate::auth::{self, AccessGate};
use crate::config::Config;
use crate::services;
use crate::views::Views;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use meterbill::outbox::{Archiver, Notifier};
use meterbill::report::PdfRenderer;
use meterbill::stat::LedgerStore;
use std::path::PathBuf;
use std::sync::Arc;

pub fn app(state: AppState) -> Router {
    let protected = Router::<AppState>::new()
        .route("/", get(services::index))
        .route("/submit", post(services::submit))
        .route("/statement", post(services::resend))
        .route("/invoice/:date", get(services::invoice))
        .route("/ledger", get(services::ledger_json))
        .route_layer(from_fn_with_state(state.clone(), auth::require_session));
    Router::new()
        .route("/login", get(auth::login))
        .route("/auth", get(auth::callback))
        .route("/logout", get(auth::logout).post(auth::logout))
        .merge(protected)
        .with_state(state)
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LedgerStore>,
    pub renderer: Arc<PdfRenderer>,
    pub notifier: Option<Arc<Notifier>>,
    pub archiver: Option<Arc<Archiver>>,
    pub gate: Option<Arc<AccessGate>>,
    pub views: Arc<Views>,
    pub invoice_dir: PathBuf,
}

impl AppState {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = LedgerStore::new(config.ledger.clone())?.with_plausibility(config.plausibility);
        let archiver = match config.archive.clone() {
            Some(cfg) => Some(Arc::new(Archiver::new(cfg)?)),
            None => None,
        };
        let gate = match config.oidc.clone() {
            Some(cfg) => Some(Arc::new(AccessGate::new(cfg)?)),
            None => None,
        };
        Ok(Self {
            store: Arc::new(store),
            renderer: Arc::new(PdfRenderer::new(config.statement.clone())),
            notifier: config.smtp.clone().map(|cfg| Arc::new(Notifier::new(cfg))),
            archiver,
            gate,
            views: Arc::new(Views::new()?),
            invoice_dir: config.invoice_dir.clone(),
        })
    }
}
