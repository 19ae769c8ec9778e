use anyhow::Context;
use edgeline_backend::config::Settings;
use edgeline_backend::db::Store;
use edgeline_backend::ingest::ProviderClient;
use edgeline_backend::state::AppState;
use edgeline_backend::{api, scheduler};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeline_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let settings = Settings::from_env();
    let store = Store::open(&settings.database_url).context("opening database")?;
    let provider = ProviderClient::new(settings.odds_api_base_url.clone()).context("building odds provider client")?;

    let state = AppState::new(store, settings, provider);

    scheduler::spawn(state.clone());

    let app = api::router().with_state(state);

    let addr = "0.0.0.0:8080";
    let listener = TcpListener::bind(addr).await.context("binding listener")?;
    tracing::info!(addr, "edgeline backend listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
