use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use intake::config::Config;
use intake::server::{AppState, start_server};
use intake::session::SessionRegistry;

pub async fn run(project_dir: &Path, port: Option<u16>, dev: bool, verbose: bool) -> Result<()> {
    super::init_tracing(verbose);

    let mut config = Config::load(project_dir)?;
    if let Some(port) = port {
        config.port = port;
    }

    let runner = Arc::new(super::build_runner(&config));
    let state = Arc::new(AppState {
        registry: Arc::new(SessionRegistry::new()),
        runner,
        config,
    });

    start_server(state, dev).await
}
