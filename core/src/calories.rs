//! Deterministic calorie and macro calculation.
//!
//! This is the path used whenever the generative endpoint is unavailable or
//! returns something unusable. Given a validated profile it cannot fail.

use std::cmp::Ordering;

use crate::models::{
    ActivityLevel, CalculationMethod, CalorieProfile, CalorieResult, Gender, MacroBreakdown,
};

/// Daily deficit applied when the target weight is below the current weight (~0.5 kg/week).
pub const DEFICIT_KCAL: i64 = 500;
/// Daily surplus applied when the target weight is above the current weight (~0.3 kg/week).
pub const SURPLUS_KCAL: i64 = 300;
/// Assumed rate of change used for the timeline estimate.
pub const WEEKLY_CHANGE_KG: f64 = 0.5;

/// Mifflin-St Jeor basal metabolic rate, unrounded.
#[must_use]
pub fn mifflin_st_jeor(profile: &CalorieProfile) -> f64 {
    let base = 10.0 * profile.current_weight_kg + 6.25 * profile.height_cm
        - 5.0 * f64::from(profile.age);
    match profile.gender {
        Gender::Male => base + 5.0,
        Gender::Female | Gender::Other => base - 161.0,
    }
}

/// TDEE from an already-rounded BMR.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tdee(bmr: i64, profile: &CalorieProfile) -> i64 {
    (bmr as f64 * profile.activity_level.multiplier()).round() as i64
}

/// Goal before the safety floor: deficit, surplus or maintenance depending on direction.
#[must_use]
pub fn adjusted_goal(tdee: i64, profile: &CalorieProfile) -> i64 {
    match profile
        .target_weight_kg
        .partial_cmp(&profile.current_weight_kg)
    {
        Some(Ordering::Less) => tdee.saturating_sub(DEFICIT_KCAL),
        Some(Ordering::Greater) => tdee.saturating_add(SURPLUS_KCAL),
        _ => tdee,
    }
}

#[must_use]
pub fn apply_floor(goal: i64, gender: Gender) -> i64 {
    goal.max(gender.calorie_floor())
}

#[must_use]
pub fn macro_split(profile: &CalorieProfile) -> MacroBreakdown {
    if profile.wants_muscle() {
        MacroBreakdown::MUSCLE_GAIN
    } else {
        MacroBreakdown::BALANCED
    }
}

#[must_use]
pub fn timeline_estimate(profile: &CalorieProfile) -> String {
    let diff = (profile.target_weight_kg - profile.current_weight_kg).abs();
    let weeks = (diff / WEEKLY_CHANGE_KG).round() as i64;
    if weeks == 0 {
        return "You are already at your target weight; focus on maintenance.".to_string();
    }
    let unit = if weeks == 1 { "week" } else { "weeks" };
    format!("approximately {weeks} {unit}")
}

/// Three to five short, profile-specific suggestions.
#[must_use]
pub fn advice(profile: &CalorieProfile, tdee: i64, goal: i64, floored: bool) -> Vec<String> {
    let mut tips = Vec::with_capacity(5);

    tips.push(
        match profile
            .target_weight_kg
            .partial_cmp(&profile.current_weight_kg)
        {
            Some(Ordering::Less) => format!(
                "Aim for about {goal} kcal a day; a {DEFICIT_KCAL} kcal deficit loses roughly 0.5 kg per week."
            ),
            Some(Ordering::Greater) => format!(
                "Aim for about {goal} kcal a day; a {SURPLUS_KCAL} kcal surplus supports lean gains of roughly 0.3 kg per week."
            ),
            _ => format!("Eat close to your maintenance level of {tdee} kcal a day to hold your weight."),
        },
    );

    let macros = macro_split(profile);
    let (protein_g, _, _) = macros.grams_for(goal);
    tips.push(format!(
        "Target around {protein_g:.0} g of protein a day, spread across your meals."
    ));

    tips.push(match profile.activity_level {
        ActivityLevel::Sedentary => {
            "Add light movement such as a daily walk to raise your energy expenditure.".to_string()
        }
        level => format!(
            "Keep your activity consistent; this plan assumes a {} lifestyle.",
            level.as_str().replace('_', " ")
        ),
    });

    if floored {
        tips.push(format!(
            "Your goal was raised to the {} kcal safe minimum; a slower pace is the safer choice.",
            profile.gender.calorie_floor()
        ));
    }

    if profile.wants_muscle() {
        tips.push(
            "Pair the higher protein split with progressive resistance training.".to_string(),
        );
    }

    tips
}

/// Full fallback result for a validated profile.
#[must_use]
pub fn calculate(profile: &CalorieProfile) -> CalorieResult {
    let bmr = mifflin_st_jeor(profile).round() as i64;
    let tdee = tdee(bmr, profile);
    let raw_goal = adjusted_goal(tdee, profile);
    let daily_calorie_goal = apply_floor(raw_goal, profile.gender);

    CalorieResult {
        bmr,
        tdee,
        daily_calorie_goal,
        macro_breakdown: macro_split(profile),
        personalized_advice: advice(profile, tdee, daily_calorie_goal, raw_goal != daily_calorie_goal),
        timeline_estimate: timeline_estimate(profile),
        calculation_method: CalculationMethod::Manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ACTIVITY_LEVELS;

    fn male_profile() -> CalorieProfile {
        CalorieProfile {
            age: 30,
            gender: Gender::Male,
            height_cm: 175.0,
            current_weight_kg: 80.0,
            target_weight_kg: 75.0,
            activity_level: ActivityLevel::Sedentary,
            goals: vec![],
            weekly_goal_kg: -0.5,
        }
    }

    fn female_profile() -> CalorieProfile {
        CalorieProfile {
            gender: Gender::Female,
            height_cm: 165.0,
            current_weight_kg: 60.0,
            target_weight_kg: 55.0,
            ..male_profile()
        }
    }

    #[test]
    fn test_male_worked_example() {
        let p = male_profile();
        assert!((mifflin_st_jeor(&p) - 1773.75).abs() < 1e-9);

        let result = calculate(&p);
        assert_eq!(result.bmr, 1774);
        assert_eq!(result.tdee, 2129);
        assert_eq!(result.daily_calorie_goal, 1629);
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
    }

    #[test]
    fn test_female_worked_example_hits_floor() {
        // 10*60 + 6.25*165 - 5*30 - 161
        let p = female_profile();
        assert!((mifflin_st_jeor(&p) - 1320.25).abs() < 1e-9);

        let result = calculate(&p);
        assert_eq!(result.bmr, 1320);
        assert_eq!(result.tdee, 1584);
        // 1584 - 500 = 1084, clamped up
        assert_eq!(result.daily_calorie_goal, 1200);
        assert!(
            result
                .personalized_advice
                .iter()
                .any(|a| a.contains("1200 kcal safe minimum"))
        );
    }

    #[test]
    fn test_female_low_bmr_clamped_from_942() {
        let mut p = female_profile();
        p.current_weight_kg = 48.2;
        p.target_weight_kg = 45.0;
        assert!((mifflin_st_jeor(&p) - 1202.25).abs() < 1e-9);

        let result = calculate(&p);
        assert_eq!(result.bmr, 1202);
        assert_eq!(result.tdee, 1442);
        assert_eq!(adjusted_goal(result.tdee, &p), 942);
        assert_eq!(result.daily_calorie_goal, 1200);
    }

    #[test]
    fn test_other_gender_uses_female_offset_and_floor() {
        let mut p = female_profile();
        p.gender = Gender::Other;
        let result = calculate(&p);
        assert_eq!(result.bmr, 1320);
        assert_eq!(result.daily_calorie_goal, 1200);
    }

    #[test]
    fn test_male_floor() {
        let mut p = male_profile();
        p.current_weight_kg = 50.0;
        p.target_weight_kg = 45.0;
        p.height_cm = 150.0;
        p.age = 70;
        // BMR = 500 + 937.5 - 350 + 5 = 1092.5 -> 1093, TDEE 1312, goal 812
        let result = calculate(&p);
        assert_eq!(result.daily_calorie_goal, 1500);
    }

    #[test]
    fn test_maintenance_goal_equals_tdee() {
        for &level in ACTIVITY_LEVELS {
            let mut p = male_profile();
            p.target_weight_kg = p.current_weight_kg;
            p.activity_level = level;
            let result = calculate(&p);
            assert_eq!(result.daily_calorie_goal, result.tdee);
        }
    }

    #[test]
    fn test_gain_adds_surplus() {
        let mut p = male_profile();
        p.target_weight_kg = 85.0;
        let result = calculate(&p);
        assert_eq!(result.daily_calorie_goal, 2129 + 300);
    }

    #[test]
    fn test_activity_multipliers() {
        let p = male_profile();
        let expected = [2129, 2439, 2750, 3060, 3371];
        for (&level, want) in ACTIVITY_LEVELS.iter().zip(expected) {
            let mut p = p.clone();
            p.activity_level = level;
            assert_eq!(tdee(1774, &p), want, "{}", level.as_str());
        }
    }

    #[test]
    fn test_macro_split_sums_to_100() {
        let mut p = male_profile();
        let m = macro_split(&p);
        assert_eq!(m, MacroBreakdown::BALANCED);
        assert_eq!(m.protein + m.carbs + m.fats, 100);

        p.goals = vec!["gain_muscle".to_string()];
        let m = macro_split(&p);
        assert_eq!(m, MacroBreakdown::MUSCLE_GAIN);
        assert_eq!(m.protein + m.carbs + m.fats, 100);
    }

    #[test]
    fn test_timeline_estimate() {
        let p = male_profile();
        assert_eq!(timeline_estimate(&p), "approximately 10 weeks");

        let mut gain = male_profile();
        gain.target_weight_kg = 80.5;
        assert_eq!(timeline_estimate(&gain), "approximately 1 week");

        let mut same = male_profile();
        same.target_weight_kg = same.current_weight_kg;
        assert!(timeline_estimate(&same).contains("already at your target"));
    }

    #[test]
    fn test_advice_count_within_bounds() {
        let mut p = female_profile();
        p.goals = vec!["muscle".to_string()];
        let result = calculate(&p);
        assert_eq!(result.personalized_advice.len(), 5);

        let mut p = male_profile();
        p.activity_level = ActivityLevel::VeryActive;
        let result = calculate(&p);
        assert_eq!(result.personalized_advice.len(), 3);
        assert!(result.personalized_advice[2].contains("very active"));
    }

    #[test]
    fn test_floor_holds_across_grid() {
        for gender in [Gender::Male, Gender::Female, Gender::Other] {
            for &level in ACTIVITY_LEVELS {
                for age in [13, 40, 120] {
                    for weight in [30.0, 90.0, 300.0] {
                        let p = CalorieProfile {
                            age,
                            gender,
                            height_cm: 100.0,
                            current_weight_kg: weight,
                            target_weight_kg: 30.0,
                            activity_level: level,
                            goals: vec![],
                            weekly_goal_kg: -1.0,
                        };
                        let r = calculate(&p);
                        assert!(r.daily_calorie_goal >= gender.calorie_floor());
                    }
                }
            }
        }
    }

    #[test]
    fn test_adjusted_goal_saturates() {
        let mut gaining = male_profile();
        gaining.target_weight_kg = 90.0;
        assert_eq!(adjusted_goal(i64::MAX, &gaining), i64::MAX);
        assert_eq!(adjusted_goal(i64::MIN, &male_profile()), i64::MIN);
    }
}
