//! End-to-end check of the bridge against a scratch database.
//!
//! Walks open, plain and transactional batches, read transactions, close and
//! delete, and reports the first step whose result does not match.

use crate::batch::{ContinuationPolicy, Operation, OperationResult};
use crate::config::{BridgeConfig, DatabaseLocation, OpenOptions};
use crate::engine::Engine;
use crate::registry::Registry;
use crate::value::SqlValue;
use anyhow::{anyhow, bail, Context, Result};

pub const SELF_TEST_DB: &str = "__sqlbridge_self_test__.db";

pub async fn run<E: Engine>(registry: &Registry<E>, config: &BridgeConfig) -> Result<()> {
    let path = config.resolve(SELF_TEST_DB, DatabaseLocation::Default);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    // Leftovers from an interrupted run.
    let _ = registry.delete(SELF_TEST_DB, &path).await;

    let outcome = steps(registry, config).await;
    if outcome.is_err() {
        let _ = registry.close(SELF_TEST_DB).await;
    }
    let cleanup = registry.delete(SELF_TEST_DB, &path).await;
    match (outcome, cleanup) {
        (Err(e), _) => {
            tracing::error!(error = %e, "self test failed");
            Err(e)
        }
        (Ok(()), Err(e)) => Err(anyhow!("cleanup delete error: {}", e)),
        (Ok(()), Ok(())) => {
            tracing::info!("self test passed");
            Ok(())
        }
    }
}

async fn steps<E: Engine>(registry: &Registry<E>, config: &BridgeConfig) -> Result<()> {
    let path = config.resolve(SELF_TEST_DB, DatabaseLocation::Default);
    let db = registry
        .open(SELF_TEST_DB, &path, OpenOptions::default())
        .await
        .context("open database")?;

    let upper = db
        .run_transaction(vec![Operation::new("SELECT UPPER('Test') AS upperText")], false)
        .await?;
    if !upper.committed {
        bail!("transaction error: {:?}", upper.control_failure);
    }
    let text = single_row(&upper.results[0], "upperText")?;
    if text != SqlValue::from("TEST") {
        bail!("incorrect upperText value: {:?} (expected: 'TEST')", text);
    }

    let null_echo = db
        .run_batch(
            vec![Operation::with_params("SELECT ? AS myResult", [SqlValue::Null])],
            ContinuationPolicy::StopOnError,
        )
        .await?;
    let echoed = single_row(&null_echo[0], "myResult")?;
    if !echoed.is_null() {
        bail!("incorrect myResult value: {:?} (expected: NULL)", echoed);
    }

    let created = db
        .run_transaction(
            vec![
                Operation::new(
                    "CREATE TABLE TestTable(id integer primary key autoincrement unique, data)",
                ),
                Operation::with_params("INSERT INTO TestTable (data) VALUES (?)", ["test-value"]),
            ],
            false,
        )
        .await?;
    if !created.committed {
        bail!("sql batch error: {:?}", created.results);
    }

    let (first_id, data) = read_test_row(registry, false).await?;
    if data != SqlValue::from("test-value") {
        bail!("incorrect data value: {:?} (expected: 'test-value')", data);
    }

    let updated = db
        .run_transaction(
            vec![Operation::with_params("UPDATE TestTable SET data = ?", ["new-value"])],
            false,
        )
        .await?;
    if !updated.committed {
        bail!("update transaction error: {:?}", updated.results);
    }
    let (id, data) = read_test_row(registry, true).await?;
    if id != first_id {
        bail!("id {} does not match previous primary key id {}", id, first_id);
    }
    if data != SqlValue::from("new-value") {
        bail!("incorrect data value: {:?} (expected: 'new-value')", data);
    }

    let replaced = db
        .run_transaction(
            vec![
                Operation::new("DELETE FROM TestTable"),
                Operation::with_params("INSERT INTO TestTable (data) VALUES (?)", [123]),
            ],
            false,
        )
        .await?;
    if !replaced.committed {
        bail!("delete transaction error: {:?}", replaced.results);
    }
    let (id, data) = read_test_row(registry, true).await?;
    if id == first_id {
        bail!("id {} incorrectly matches previous unique key id", id);
    }
    if data != SqlValue::Integer(123) {
        bail!("incorrect data value: {:?} (expected: 123)", data);
    }

    registry.close(SELF_TEST_DB).await.context("close error")?;
    Ok(())
}

async fn read_test_row<E: Engine>(
    registry: &Registry<E>,
    read_only: bool,
) -> Result<(i64, SqlValue)> {
    let outcome = registry
        .run_transaction(
            SELF_TEST_DB,
            vec![Operation::new("SELECT id, data FROM TestTable")],
            read_only,
        )
        .await?;
    if !outcome.committed {
        bail!("read transaction error: {:?}", outcome.results);
    }
    let OperationResult::RowSet { rows, .. } = &outcome.results[0] else {
        bail!("missing result rows: {:?}", outcome.results[0]);
    };
    if rows.len() != 1 {
        bail!("incorrect rows length: {} (expected: 1)", rows.len());
    }
    let id = rows[0][0]
        .as_i64()
        .ok_or_else(|| anyhow!("missing id: {:?}", rows[0][0]))?;
    Ok((id, rows[0][1].clone()))
}

fn single_row(result: &OperationResult, column: &str) -> Result<SqlValue> {
    let OperationResult::RowSet { columns, rows } = result else {
        bail!("missing result rows: {:?}", result);
    };
    if rows.len() != 1 {
        bail!("incorrect rows length: {} (expected: 1)", rows.len());
    }
    let idx = columns
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| anyhow!("missing column {}", column))?;
    Ok(rows[0][idx].clone())
}
