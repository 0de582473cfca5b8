use anyhow::{Result, bail};
use serde_json::json;

use nourish_core::models::{OperationKind, QueuedOperation};
use nourish_core::queue::{OfflineQueue, SubmitOutcome};

use super::helpers::{describe_drain, parse_json_object, parse_record_id, print_queue_table};

pub(crate) fn cmd_queue_show(queue: &OfflineQueue, json: bool) -> Result<()> {
    let pending = queue.pending();
    let dead = queue.dead_letters();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "pending": pending, "dead_letters": dead }))?
        );
        return Ok(());
    }

    if pending.is_empty() {
        eprintln!("No pending operations.");
    } else {
        println!("Pending ({}):", pending.len());
        print_queue_table(&pending);
    }
    if !dead.is_empty() {
        println!("\nGiven up ({}):", dead.len());
        print_queue_table(&dead);
    }
    Ok(())
}

pub(crate) async fn cmd_queue_drain(queue: &OfflineQueue, json: bool) -> Result<()> {
    let report = queue.drain().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("{}", describe_drain(&report));
    }
    Ok(())
}

pub(crate) fn cmd_queue_clear(queue: &OfflineQueue, json: bool) -> Result<()> {
    let dropped = queue.len() + queue.dead_letters().len();
    queue.clear();
    if json {
        println!("{}", json!({ "cleared": dropped }));
    } else {
        eprintln!("Discarded {dropped} queued operation(s).");
    }
    Ok(())
}

/// Build the operation for `queue push`.
///
/// Inserts take the JSON as the record. Updates and deletes need `--id`; for
/// an update the JSON is the partial update.
pub(crate) fn build_operation(
    kind: &str,
    target: &str,
    payload: Option<&str>,
    id: Option<&str>,
) -> Result<QueuedOperation> {
    if target.trim().is_empty() {
        bail!("Target table must not be empty");
    }
    let kind = OperationKind::parse(kind)?;
    let op = match (kind, payload, id) {
        (OperationKind::Insert, Some(p), _) => QueuedOperation::insert(target, parse_json_object(p)?),
        (OperationKind::Insert, None, _) => bail!("insert needs a JSON record"),
        (OperationKind::Update, Some(p), Some(id)) => {
            QueuedOperation::update(target, parse_record_id(id), parse_json_object(p)?)
        }
        (OperationKind::Update, None, _) => bail!("update needs a JSON partial update"),
        (OperationKind::Delete, _, Some(id)) => QueuedOperation::delete(target, parse_record_id(id)),
        (OperationKind::Update | OperationKind::Delete, _, None) => {
            bail!("{} needs --id", kind.as_str())
        }
    };
    Ok(op)
}

pub(crate) async fn cmd_queue_push(
    queue: &OfflineQueue,
    op: QueuedOperation,
    now: bool,
    json: bool,
) -> Result<()> {
    let outcome = if now {
        queue.submit(op).await
    } else {
        queue.enqueue_operation(op);
        SubmitOutcome::Queued
    };

    if json {
        println!("{}", json!({ "outcome": outcome, "pending": queue.len() }));
    } else {
        match outcome {
            SubmitOutcome::Applied => eprintln!("Applied to remote store."),
            SubmitOutcome::Queued => eprintln!("Queued ({} pending).", queue.len()),
        }
    }
    Ok(())
}
