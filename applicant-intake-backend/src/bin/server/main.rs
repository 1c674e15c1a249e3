use applicant_intake_backend::error::AppError;
use applicant_intake_backend::telemetry::setup_telemetry;
use applicant_intake_backend::{app, shutdown_signal, MyState};
use applicant_intake_config::get_config;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    setup_telemetry();

    let config = get_config()?;
    let state = MyState::from_config(&config)?;
    if config.admins.is_empty() {
        info!("no admins configured, every admin login will be rejected");
    }
    let sweeper = state.views().spawn_sweeper();

    let listener = TcpListener::bind(config.listen).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}
