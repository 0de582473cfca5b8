use anyhow::{Result, bail};
use serde_json::json;

use nourish_core::error::ResolveError;
use nourish_core::models::{ActivityLevel, CalorieProfile, Gender};
use nourish_core::queue::SubmitOutcome;
use nourish_core::service::PlanService;

use super::helpers::{print_plan_table, print_result};

/// Raw `plan` flags, before parsing into a profile.
pub(crate) struct PlanInput {
    pub age: u32,
    pub gender: String,
    pub height_cm: f64,
    pub current_weight_kg: f64,
    pub target_weight_kg: f64,
    pub activity: String,
    pub goals: Vec<String>,
    pub weekly_goal_kg: Option<f64>,
}

impl PlanInput {
    /// The weekly rate defaults to 0.5 kg toward the target.
    pub(crate) fn into_profile(self) -> Result<CalorieProfile> {
        let weekly_goal_kg = self.weekly_goal_kg.unwrap_or_else(|| {
            if self.target_weight_kg < self.current_weight_kg {
                -0.5
            } else if self.target_weight_kg > self.current_weight_kg {
                0.5
            } else {
                0.0
            }
        });
        Ok(CalorieProfile {
            age: self.age,
            gender: Gender::parse(&self.gender)?,
            height_cm: self.height_cm,
            current_weight_kg: self.current_weight_kg,
            target_weight_kg: self.target_weight_kg,
            activity_level: ActivityLevel::parse(&self.activity)?,
            goals: self.goals,
            weekly_goal_kg,
        })
    }
}

pub(crate) async fn cmd_plan(
    service: &PlanService,
    input: PlanInput,
    save: bool,
    json: bool,
) -> Result<()> {
    let profile = input.into_profile()?;

    if !save {
        let result = match service.preview(&profile).await {
            Ok(r) => r,
            Err(e) => return Err(resolve_failure(&e, json)),
        };
        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_result(&result);
            eprintln!("\nPreview only. Re-run with --save to keep this plan.");
        }
        return Ok(());
    }

    let outcome = match service.create_plan(&profile).await {
        Ok(o) => o,
        Err(e) => {
            return Err(match e.downcast_ref::<ResolveError>() {
                Some(re) => resolve_failure(re, json),
                None => e,
            });
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_result(&outcome.plan.result);
        eprintln!("\nSaved plan #{}.", outcome.plan.id);
        match outcome.sync {
            SubmitOutcome::Applied => eprintln!("Synced to remote store."),
            SubmitOutcome::Queued => eprintln!(
                "Remote store unavailable; queued for sync ({} pending).",
                service.queue().len()
            ),
        }
    }
    Ok(())
}

/// Errors carry their kind so scripted callers can branch on it.
fn resolve_failure(e: &ResolveError, json: bool) -> anyhow::Error {
    if json {
        println!("{}", json!({ "error": e.to_string(), "kind": e.kind() }));
    }
    anyhow::anyhow!("{} ({})", e, e.kind())
}

pub(crate) fn cmd_plans(service: &PlanService, limit: i64, json: bool) -> Result<()> {
    if limit <= 0 {
        bail!("--limit must be greater than 0");
    }
    let plans = service.plan_history(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    } else if plans.is_empty() {
        eprintln!("No saved plans. Use `nourish plan ... --save` to create one.");
    } else {
        print_plan_table(&plans);
    }
    Ok(())
}

pub(crate) async fn cmd_plan_delete(service: &PlanService, id: i64, json: bool) -> Result<()> {
    let Some(sync) = service.delete_plan(id).await? else {
        bail!("Plan #{id} not found");
    };
    if json {
        println!("{}", json!({ "deleted": id, "sync": sync }));
    } else {
        eprintln!("Deleted plan #{id}.");
        if sync == SubmitOutcome::Queued {
            eprintln!(
                "Remote store unavailable; removal queued for sync ({} pending).",
                service.queue().len()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PlanInput {
        PlanInput {
            age: 30,
            gender: "male".to_string(),
            height_cm: 175.0,
            current_weight_kg: 80.0,
            target_weight_kg: 75.0,
            activity: "moderately-active".to_string(),
            goals: vec![],
            weekly_goal_kg: None,
        }
    }

    #[test]
    fn test_into_profile_parses_enums() {
        let profile = input().into_profile().unwrap();
        assert_eq!(profile.gender, Gender::Male);
        assert_eq!(profile.activity_level, ActivityLevel::ModeratelyActive);
    }

    #[test]
    fn test_weekly_rate_defaults_toward_target() {
        assert!((input().into_profile().unwrap().weekly_goal_kg + 0.5).abs() < f64::EPSILON);

        let mut gain = input();
        gain.target_weight_kg = 85.0;
        assert!((gain.into_profile().unwrap().weekly_goal_kg - 0.5).abs() < f64::EPSILON);

        let mut keep = input();
        keep.target_weight_kg = 80.0;
        assert!(keep.into_profile().unwrap().weekly_goal_kg.abs() < f64::EPSILON);

        let mut explicit = input();
        explicit.weekly_goal_kg = Some(-0.25);
        assert!((explicit.into_profile().unwrap().weekly_goal_kg + 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_into_profile_rejects_unknown_values() {
        let mut bad = input();
        bad.gender = "robot".to_string();
        assert!(bad.into_profile().is_err());

        let mut bad = input();
        bad.activity = "couch".to_string();
        assert!(bad.into_profile().is_err());
    }
}
