// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::reconcile::{ReconcileError, ReconcileOutcome};
use crate::domain::condition::{ConditionType, Conditioned, REASON_ERROR};
use crate::domain::meta::Resource;
use crate::domain::store::ResourceStore;

/// Persist `condition` on `obj` with one status write, or return
/// `Unchanged` when the stored condition already has this truth value and
/// message.
pub async fn set_condition<R, S>(
    store: &S,
    obj: &R,
    condition: ConditionType,
    is_true: bool,
    message: &str,
) -> Result<ReconcileOutcome<R>, ReconcileError>
where
    R: Resource + Conditioned,
    S: ResourceStore<R> + ?Sized,
{
    if obj.condition_matches(condition, is_true, message) {
        return Ok(ReconcileOutcome::Unchanged);
    }

    let reason = if is_true { "" } else { REASON_ERROR };
    let mut updated = obj.clone();
    updated.set_condition(condition, is_true, reason, message);
    let persisted = store.update_status(&updated).await?;
    Ok(ReconcileOutcome::Updated(persisted))
}
