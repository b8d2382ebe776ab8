use std::process::ExitCode;
use std::sync::Arc;

use campus_etl::config::PipelineConfig;
use campus_etl::observability::StdErrObserver;
use campus_etl::pipeline::{connector_from_config, Pipeline};

fn main() -> ExitCode {
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[etl][Critical] {e}");
            return ExitCode::FAILURE;
        }
    };
    let connector = match connector_from_config(&config) {
        Ok(connector) => connector,
        Err(e) => {
            eprintln!("[etl][Critical] {e}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("[etl] target={} source={}", connector.target(), config.source_path.display());
    let summary = Pipeline::new(config, connector)
        .with_observer(Arc::new(StdErrObserver))
        .run();

    for stage in &summary.stages {
        eprintln!("[etl] stage={} outcome={:?} tables={}", stage.stage, stage.outcome, stage.loads.len());
    }
    ExitCode::SUCCESS
}
