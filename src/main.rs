use zbridge::app;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,zbridge=debug")),
        )
        .json()
        .init();

    if let Err(err) = serve().await {
        tracing::error!("startup failed: {err}");
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let state = app::load_state().map_err(|err| err.message)?;
    let addr = state.runtime.listen_addr().map_err(|err| err.message)?;
    let router = app::build_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
