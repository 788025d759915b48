use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use dotenvy::dotenv;

use hrm_workflow::collab::{
    HolidayCalendar, LocalFileStore, ManifestCertificateGenerator, SqlAuditSink,
    SqlIdentityProvider,
};
use hrm_workflow::config::Config;
use hrm_workflow::db::init_db;
use hrm_workflow::docs::ApiDoc;
use hrm_workflow::routes;
use hrm_workflow::store::{MySqlStore, WorkflowStore};
use hrm_workflow::workflow::WorkflowOrchestrator;
use hrm_workflow::workflow::hooks::{AuditTrailHook, CertificateHook, TransitionHook};
use tracing::info;
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "HRM workflow service"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pool = init_db(&config.database_url)
        .await
        .context("failed to connect to database")?;
    let calendar = HolidayCalendar::load(&pool)
        .await
        .context("failed to load holiday calendar")?;

    let store: Arc<dyn WorkflowStore> = Arc::new(MySqlStore::new(pool.clone()));
    let files = Arc::new(LocalFileStore::new(
        config.storage_root.clone(),
        config.storage_base_url.clone(),
    ));
    let hooks: Vec<Arc<dyn TransitionHook>> = vec![
        Arc::new(AuditTrailHook::new(Arc::new(SqlAuditSink::new(pool.clone())))),
        Arc::new(CertificateHook::new(
            Arc::new(ManifestCertificateGenerator::new(files.clone())),
            store.clone(),
        )),
    ];
    let workflow = Data::new(WorkflowOrchestrator::new(
        store,
        Arc::new(SqlIdentityProvider::new(pool.clone())),
        Arc::new(calendar),
        files,
        hooks,
        config.workflow_settings(),
    ));

    info!(
        leave_request_type_id = ?config.leave_request_type_id,
        enforce_leave_entitlement = config.enforce_leave_entitlement,
        "Workflow engine ready"
    );

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // Wildcard {_:.*} so the JS/CSS assets match too.
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(config.clone()))
            .app_data(workflow.clone())
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
