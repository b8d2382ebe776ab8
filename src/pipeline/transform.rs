//! Transform: staging tables through the rule set into the warehouse layer.

use crate::error::{PipelineError, PipelineResult};
use crate::observability::PipelineEvent;
use crate::transform::EntityKind;
use crate::warehouse::{Layer, Session, Statement, TableName};

use super::{Pipeline, StageRun};

pub(super) fn run(pipeline: &Pipeline, session: &mut dyn Session, run: &mut StageRun<'_>) -> PipelineResult<()> {
    let listing = list_tables(session, Layer::Staging)?;
    for (name, e) in &listing.invalid {
        run.table_failed(name, e);
    }
    for table in &listing.tables {
        if let Err(e) = transform_table(pipeline, session, run, table) {
            run.table_failed(table.as_str(), &e);
        }
    }
    Ok(())
}

/// Tables found in one layer.
#[derive(Debug, Default)]
pub(super) struct Listing {
    /// Valid table names, sorted.
    pub tables: Vec<TableName>,
    /// Names the database returned that are not valid table names, with the reason.
    pub invalid: Vec<(String, PipelineError)>,
}

/// Tables of `layer`. A name that fails validation is set aside, not fatal.
pub(super) fn list_tables(session: &mut dyn Session, layer: Layer) -> PipelineResult<Listing> {
    let statement = Statement::ListTables { layer };
    let listed = session.query(&statement, &statement.implicit_params())?;
    let mut listing = Listing::default();
    for value in listed.rows.iter().filter_map(|row| row.first()) {
        let Some(name) = value.as_str() else {
            listing.invalid.push((
                value.to_string(),
                PipelineError::Statement {
                    message: format!("table listing returned a non-text name: {value:?}"),
                },
            ));
            continue;
        };
        match TableName::new(name) {
            Ok(table) => listing.tables.push(table),
            Err(e) => listing.invalid.push((name.to_string(), e)),
        }
    }
    listing.tables.sort();
    Ok(listing)
}

fn transform_table(
    pipeline: &Pipeline,
    session: &mut dyn Session,
    run: &mut StageRun<'_>,
    table: &TableName,
) -> PipelineResult<()> {
    let mut records = session.query(&Statement::SelectAll { table: table.clone() }, &[])?;
    // Storage order is arbitrary; occurrence ids and "first wins" dedup follow key order.
    records.sort_by_column(pipeline.rules.key_field());
    let kind = EntityKind::from_table_name(table);
    let out = pipeline.rules.transform(kind, records)?;

    let stage = run.stage();
    for rejected in &out.rejected {
        run.event(PipelineEvent::RowRejected {
            stage,
            table: table.to_string(),
            reason: rejected.to_string(),
        });
    }
    for coerced in &out.coerced {
        run.event(PipelineEvent::ValueCoerced {
            stage,
            table: table.to_string(),
            row: coerced.row,
            column: coerced.column.clone(),
            raw: coerced.raw.clone(),
        });
    }
    if out.duplicates > 0 {
        run.event(PipelineEvent::DuplicatesDropped {
            stage,
            table: table.to_string(),
            count: out.duplicates,
        });
    }

    let target = table.to_layer(Layer::Warehouse)?;
    let result = pipeline
        .loader
        .load(session, &target, &out.records, pipeline.rules.key_field())?;
    run.loaded(&target, result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::list_tables;
    use crate::error::PipelineError;
    use crate::warehouse::{execute_ddl, Layer, SessionScope, SqliteWarehouse};

    #[test]
    fn invalid_names_are_set_aside() {
        let wh = SqliteWarehouse::in_memory().unwrap();
        let mut session = SessionScope::open(&wh).unwrap();
        execute_ddl(
            &mut *session,
            "CREATE TABLE stg__b (id INT); CREATE TABLE \"stg__Bad Name\" (id INT); CREATE TABLE stg__a (id INT);",
        )
        .unwrap();

        let listing = list_tables(&mut *session, Layer::Staging).unwrap();
        let names: Vec<&str> = listing.tables.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["stg__a", "stg__b"]);
        assert_eq!(listing.invalid.len(), 1);
        assert_eq!(listing.invalid[0].0, "stg__Bad Name");
        assert!(matches!(listing.invalid[0].1, PipelineError::InvalidIdentifier { .. }));
    }
}
