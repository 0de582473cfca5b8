use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ResolveError;
use crate::models::{CalorieProfile, CalorieResult, QueuedOperation, SavedPlan};
use crate::queue::{OfflineQueue, SubmitOutcome};
use crate::resolver::CalorieResolver;
use crate::storage::LocalStore;

/// Remote table that receives resolved daily goals.
pub const GOALS_TARGET: &str = "user_goals";

#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    pub plan: SavedPlan,
    pub sync: SubmitOutcome,
}

/// Onboarding flow: resolve a plan, keep it locally, push it to the remote store.
///
/// Remote failures never reach the caller; the write is left in the offline
/// queue instead.
pub struct PlanService {
    store: Arc<LocalStore>,
    queue: Arc<OfflineQueue>,
    resolver: CalorieResolver,
}

impl PlanService {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, queue: Arc<OfflineQueue>, resolver: CalorieResolver) -> Self {
        Self {
            store,
            queue,
            resolver,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Resolve without saving anything.
    pub async fn preview(&self, profile: &CalorieProfile) -> Result<CalorieResult, ResolveError> {
        self.resolver.resolve(profile).await
    }

    /// Resolve, store locally and submit to the remote store.
    ///
    /// Fails only on invalid input (as a `ResolveError`) or a local database error.
    pub async fn create_plan(&self, profile: &CalorieProfile) -> Result<PlanOutcome> {
        let result = self.resolver.resolve(profile).await?;
        let plan = self.store.lock()?.insert_plan(profile, &result)?;

        let sync = self
            .queue
            .submit(QueuedOperation::insert(GOALS_TARGET, goal_record(&plan)))
            .await;
        tracing::info!(
            plan_id = plan.id,
            method = plan.result.calculation_method.as_str(),
            daily_calorie_goal = plan.result.daily_calorie_goal,
            ?sync,
            "saved calorie plan"
        );

        Ok(PlanOutcome { plan, sync })
    }

    pub fn plan_history(&self, limit: i64) -> Result<Vec<SavedPlan>> {
        self.store.lock()?.list_plans(limit)
    }

    pub fn latest_plan(&self) -> Result<Option<SavedPlan>> {
        Ok(self.plan_history(1)?.into_iter().next())
    }

    /// Delete a saved plan locally and remove its goal row from the remote store.
    ///
    /// Returns `None` when no plan has that id.
    pub async fn delete_plan(&self, id: i64) -> Result<Option<SubmitOutcome>> {
        let uuid = {
            let db = self.store.lock()?;
            let Some(uuid) = db.plan_uuid(id)? else {
                return Ok(None);
            };
            db.delete_plan(id)?;
            uuid
        };

        let sync = self
            .queue
            .submit(QueuedOperation::delete(GOALS_TARGET, json!(uuid)))
            .await;
        tracing::info!(plan_id = id, ?sync, "deleted calorie plan");
        Ok(Some(sync))
    }
}

/// Row written to the remote goals table.
#[must_use]
pub fn goal_record(plan: &SavedPlan) -> Value {
    let result = &plan.result;
    json!({
        "id": plan.uuid,
        "age": plan.profile.age,
        "gender": plan.profile.gender.as_str(),
        "height_cm": plan.profile.height_cm,
        "current_weight_kg": plan.profile.current_weight_kg,
        "target_weight_kg": plan.profile.target_weight_kg,
        "activity_level": plan.profile.activity_level.as_str(),
        "weekly_goal_kg": plan.profile.weekly_goal_kg,
        "bmr": result.bmr,
        "tdee": result.tdee,
        "daily_calorie_goal": result.daily_calorie_goal,
        "protein_pct": result.macro_breakdown.protein,
        "carbs_pct": result.macro_breakdown.carbs,
        "fats_pct": result.macro_breakdown.fats,
        "calculation_method": result.calculation_method.as_str(),
        "created_at": plan.created_at,
    })
}
