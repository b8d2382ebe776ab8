//! Extract: source files into the staging layer.

use crate::error::PipelineResult;
use crate::ingestion::{self, discover_sources, SourceFile};
use crate::warehouse::{Layer, Session, TableName};

use super::{Pipeline, StageRun};

pub(super) fn run(pipeline: &Pipeline, session: &mut dyn Session, run: &mut StageRun<'_>) -> PipelineResult<()> {
    for source in discover_sources(&pipeline.config.source_path)? {
        if let Err(e) = load_source(pipeline, session, run, &source) {
            run.table_failed(&format!("{}{}", Layer::Staging.prefix(), source.entity), &e);
        }
    }
    Ok(())
}

fn load_source(
    pipeline: &Pipeline,
    session: &mut dyn Session,
    run: &mut StageRun<'_>,
    source: &SourceFile,
) -> PipelineResult<()> {
    let table = TableName::in_layer(Layer::Staging, &source.entity)?;
    let records = ingestion::read(&source.path)?;
    let result = pipeline
        .loader
        .load(session, &table, &records, pipeline.rules.key_field())?;
    run.loaded(&table, result);
    Ok(())
}
