//! Calorie/macro resolver.
//!
//! Prefers a generative model, but always produces a safe result: any failure
//! on that path (transport, timeout, unparseable or incomplete output) falls
//! back to the deterministic formula in [`crate::calories`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calories;
use crate::error::ResolveError;
use crate::models::{
    CalculationMethod, CalorieProfile, CalorieResult, MacroBreakdown, profile_violations,
    validate_macro_split,
};

pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(15);
const MIN_ADVICE: usize = 3;
const MAX_ADVICE: usize = 5;
/// Plausible range for any kcal/day figure a model returns.
const KCAL_RANGE: std::ops::RangeInclusive<f64> = 500.0..=20_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            max_output_tokens: 1024,
        }
    }
}

/// Text generation endpoint.
///
/// Returns the raw model text. No schema is enforced on the other side, so the
/// resolver extracts and validates whatever comes back.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    async fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String>;
}

pub struct CalorieResolver {
    provider: Option<Arc<dyn GenerativeProvider>>,
    sampling: SamplingConfig,
    timeout: Duration,
}

impl CalorieResolver {
    #[must_use]
    pub fn new(provider: Option<Arc<dyn GenerativeProvider>>) -> Self {
        Self {
            provider,
            sampling: SamplingConfig::default(),
            timeout: DEFAULT_AI_TIMEOUT,
        }
    }

    /// Resolver that never calls out and always uses the formula.
    #[must_use]
    pub fn manual_only() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Resolve a plan for `profile`.
    ///
    /// The only error a caller can see is `ResolveError::InvalidInput`.
    pub async fn resolve(&self, profile: &CalorieProfile) -> Result<CalorieResult, ResolveError> {
        let fields = profile_violations(profile);
        if !fields.is_empty() {
            return Err(ResolveError::InvalidInput { fields });
        }

        let Some(provider) = &self.provider else {
            tracing::debug!("no generative provider configured, using formula");
            return Ok(calories::calculate(profile));
        };

        match self.resolve_generative(provider.as_ref(), profile).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(kind = e.kind(), "generative plan rejected, using formula: {e}");
                Ok(calories::calculate(profile))
            }
        }
    }

    async fn resolve_generative(
        &self,
        provider: &dyn GenerativeProvider,
        profile: &CalorieProfile,
    ) -> Result<CalorieResult, ResolveError> {
        let prompt = build_prompt(profile);
        let text = tokio::time::timeout(self.timeout, provider.generate(&prompt, &self.sampling))
            .await
            .map_err(|_| ResolveError::Api(format!("no response within {:?}", self.timeout)))?
            .map_err(|e| ResolveError::Api(format!("{e:#}")))?;

        parse_response(&text, profile)
    }
}

/// Instruction sent to the model: the profile plus a strict output contract.
#[must_use]
pub fn build_prompt(profile: &CalorieProfile) -> String {
    let goals = if profile.goals.is_empty() {
        "none specified".to_string()
    } else {
        profile.goals.join(", ")
    };

    format!(
        "You are a registered dietitian. Calculate a daily calorie plan for this person.\n\
         \n\
         Profile:\n\
         - Age: {age} years\n\
         - Gender: {gender}\n\
         - Height: {height} cm\n\
         - Current weight: {current} kg\n\
         - Target weight: {target} kg\n\
         - Activity level: {activity}\n\
         - Goals: {goals}\n\
         - Weekly goal: {weekly:+} kg per week\n\
         \n\
         Use the Mifflin-St Jeor equation for BMR and standard activity multipliers for TDEE.\n\
         Never recommend fewer than {floor} kcal per day.\n\
         \n\
         Respond with a single JSON object and nothing else, using exactly these keys:\n\
         {{\n  \
           \"bmr\": <integer kcal/day>,\n  \
           \"tdee\": <integer kcal/day>,\n  \
           \"dailyCalorieGoal\": <integer kcal/day>,\n  \
           \"macroBreakdown\": {{ \"protein\": <integer %>, \"carbs\": <integer %>, \"fats\": <integer %> }},\n  \
           \"personalizedAdvice\": [<3 to 5 short strings>],\n  \
           \"timelineEstimate\": \"<short human-readable estimate>\"\n\
         }}\n\
         The macro percentages must sum to 100.",
        age = profile.age,
        gender = profile.gender.as_str(),
        height = profile.height_cm,
        current = profile.current_weight_kg,
        target = profile.target_weight_kg,
        activity = profile.activity_level.as_str(),
        weekly = profile.weekly_goal_kg,
        floor = profile.gender.calorie_floor(),
    )
}

/// Find the first balanced `{...}` substring that parses as a JSON object.
///
/// Models wrap JSON in prose or code fences; braces inside string literals are
/// ignored when matching.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<Value> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let open = from + offset;
        if let Some(close) = matching_brace(&text[open..]) {
            let candidate = &text[open..=open + close];
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
        from = open + 1;
    }
    None
}

fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerativePlan {
    bmr: Option<f64>,
    tdee: Option<f64>,
    #[serde(alias = "daily_calorie_goal")]
    daily_calorie_goal: Option<f64>,
    #[serde(alias = "macro_breakdown")]
    macro_breakdown: Option<GenerativeMacros>,
    #[serde(alias = "personalized_advice")]
    personalized_advice: Option<Vec<String>>,
    #[serde(alias = "timeline_estimate")]
    timeline_estimate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerativeMacros {
    protein: f64,
    carbs: f64,
    #[serde(alias = "fat")]
    fats: f64,
}

fn required_kcal(value: Option<f64>, field: &str) -> Result<i64, ResolveError> {
    match value {
        Some(v) if KCAL_RANGE.contains(&v) => Ok(v.round() as i64),
        Some(v) => Err(ResolveError::Parsing(format!(
            "{field} is outside {}-{} kcal: {v}",
            KCAL_RANGE.start(),
            KCAL_RANGE.end()
        ))),
        None => Err(ResolveError::Parsing(format!("missing {field}"))),
    }
}

/// Turn raw model text into a validated result tagged `ai`.
///
/// Required numbers must be present and within a plausible kcal range. Optional parts that are
/// missing or inconsistent are filled from the formula. The calorie floor is
/// enforced on the way out.
pub fn parse_response(text: &str, profile: &CalorieProfile) -> Result<CalorieResult, ResolveError> {
    let object = extract_json_object(text)
        .ok_or_else(|| ResolveError::Parsing("no JSON object in response".to_string()))?;
    let plan: GenerativePlan =
        serde_json::from_value(object).map_err(|e| ResolveError::Parsing(e.to_string()))?;

    let bmr = required_kcal(plan.bmr, "bmr")?;
    let tdee = required_kcal(plan.tdee, "tdee")?;
    let goal = required_kcal(plan.daily_calorie_goal, "dailyCalorieGoal")?;

    let daily_calorie_goal = calories::apply_floor(goal, profile.gender);
    if daily_calorie_goal != goal {
        tracing::warn!(
            suggested = goal,
            floor = daily_calorie_goal,
            "generative goal below safe minimum, raised to floor"
        );
    }

    let macro_breakdown = plan
        .macro_breakdown
        .map(|m| MacroBreakdown {
            protein: m.protein.round() as i64,
            carbs: m.carbs.round() as i64,
            fats: m.fats.round() as i64,
        })
        .filter(|m| {
            let valid = validate_macro_split(m.protein, m.carbs, m.fats);
            if let Err(e) = &valid {
                tracing::debug!("ignoring generative macro split: {e}");
            }
            valid.is_ok()
        })
        .unwrap_or_else(|| calories::macro_split(profile));

    let mut personalized_advice: Vec<String> = plan
        .personalized_advice
        .unwrap_or_default()
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .take(MAX_ADVICE)
        .collect();
    if personalized_advice.len() < MIN_ADVICE {
        let floored = daily_calorie_goal != calories::adjusted_goal(tdee, profile);
        for tip in calories::advice(profile, tdee, daily_calorie_goal, floored) {
            if personalized_advice.len() >= MIN_ADVICE {
                break;
            }
            personalized_advice.push(tip);
        }
    }

    let timeline_estimate = plan
        .timeline_estimate
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| calories::timeline_estimate(profile));

    Ok(CalorieResult {
        bmr,
        tdee,
        daily_calorie_goal,
        macro_breakdown,
        personalized_advice,
        timeline_estimate,
        calculation_method: CalculationMethod::Ai,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityLevel, Gender};
    use std::sync::Mutex;

    struct MockProvider {
        reply: Result<String, String>,
        delay: Option<Duration>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                delay: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                delay: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerativeProvider for MockProvider {
        async fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<String> {
            assert!(sampling.temperature <= 0.2);
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn resolver(provider: &Arc<MockProvider>) -> CalorieResolver {
        CalorieResolver::new(Some(provider.clone()))
    }

    fn profile() -> CalorieProfile {
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

    const GOOD_REPLY: &str = r#"Here's your plan:
```json
{
  "bmr": 1780,
  "tdee": 2136,
  "dailyCalorieGoal": 1636,
  "macroBreakdown": { "protein": 30, "carbs": 40, "fats": 30 },
  "personalizedAdvice": ["Eat more vegetables {daily}", "Walk after meals", "Sleep 8 hours"],
  "timelineEstimate": "about 10 weeks"
}
```
Good luck!"#;

    #[tokio::test]
    async fn test_invalid_input_is_surfaced_without_calling_provider() {
        let provider = MockProvider::replying(GOOD_REPLY);
        let mut p = profile();
        p.age = 10;
        p.height_cm = 260.0;

        let err = resolver(&provider).resolve(&p).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_INPUT");
        match err {
            ResolveError::InvalidInput { fields } => assert_eq!(fields, vec!["age", "height_cm"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_manual_only_uses_formula() {
        let result = CalorieResolver::manual_only()
            .resolve(&profile())
            .await
            .unwrap();
        assert_eq!(result, calories::calculate(&profile()));
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
    }

    #[tokio::test]
    async fn test_ai_reply_wrapped_in_prose_is_used() {
        let provider = MockProvider::replying(GOOD_REPLY);
        let result = resolver(&provider).resolve(&profile()).await.unwrap();

        assert_eq!(result.calculation_method, CalculationMethod::Ai);
        assert_eq!(result.bmr, 1780);
        assert_eq!(result.tdee, 2136);
        assert_eq!(result.daily_calorie_goal, 1636);
        assert_eq!(result.macro_breakdown, MacroBreakdown::MUSCLE_GAIN);
        assert_eq!(result.personalized_advice.len(), 3);
        assert_eq!(result.personalized_advice[0], "Eat more vegetables {daily}");
        assert_eq!(result.timeline_estimate, "about 10 weeks");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_required_key_falls_back() {
        let provider = MockProvider::replying(r#"{"bmr": 1780, "tdee": 2136}"#);
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
        assert_eq!(result.daily_calorie_goal, 1629);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back() {
        let provider = MockProvider::replying("Sorry, I can't help with that.");
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
    }

    #[tokio::test]
    async fn test_wrongly_typed_reply_falls_back() {
        let provider = MockProvider::replying(
            r#"{"bmr": "1780", "tdee": 2136, "dailyCalorieGoal": "1 1/2 thousand"}"#,
        );
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
    }

    #[tokio::test]
    async fn test_non_positive_values_fall_back() {
        let provider =
            MockProvider::replying(r#"{"bmr": 0, "tdee": 2136, "dailyCalorieGoal": 1600}"#);
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let provider = MockProvider::failing("503 Service Unavailable");
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_and_falls_back() {
        let provider = Arc::new(MockProvider {
            reply: Ok(GOOD_REPLY.to_string()),
            delay: Some(Duration::from_secs(60)),
            prompts: Mutex::new(Vec::new()),
        });
        let result = resolver(&provider)
            .with_timeout(Duration::from_secs(15))
            .resolve(&profile())
            .await
            .unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
    }

    #[tokio::test]
    async fn test_ai_goal_below_floor_is_raised() {
        let provider = MockProvider::replying(
            r#"{"bmr": 1300, "tdee": 1560, "dailyCalorieGoal": 900,
                "macroBreakdown": {"protein": 25, "carbs": 45, "fats": 30},
                "personalizedAdvice": ["a", "b", "c"], "timelineEstimate": "8 weeks"}"#,
        );
        let mut p = profile();
        p.gender = Gender::Female;
        let result = resolver(&provider).resolve(&p).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Ai);
        assert_eq!(result.daily_calorie_goal, 1200);
    }

    #[tokio::test]
    async fn test_optional_parts_are_filled_from_formula() {
        let provider = MockProvider::replying(
            r#"{"bmr": 1774.4, "tdee": 2128.6, "daily_calorie_goal": 1628.5,
                "macro_breakdown": {"protein": 50, "carbs": 50, "fats": 50},
                "personalized_advice": ["  Drink water  ", ""]}"#,
        );
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Ai);
        assert_eq!(result.bmr, 1774);
        assert_eq!(result.tdee, 2129);
        assert_eq!(result.daily_calorie_goal, 1629);
        assert_eq!(result.macro_breakdown, MacroBreakdown::BALANCED);
        assert_eq!(result.personalized_advice.len(), 3);
        assert_eq!(result.personalized_advice[0], "Drink water");
        assert_eq!(result.timeline_estimate, "approximately 10 weeks");
    }

    #[test]
    fn test_advice_is_capped_at_five() {
        let text = r#"{"bmr": 1780, "tdee": 2136, "dailyCalorieGoal": 2000,
            "personalizedAdvice": ["1", "2", "3", "4", "5", "6", "7"]}"#;
        let result = parse_response(text, &profile()).unwrap();
        assert_eq!(result.personalized_advice, vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_huge_kcal_is_rejected() {
        let mut gaining = profile();
        gaining.target_weight_kg = 85.0;
        gaining.weekly_goal_kg = 0.5;
        let err = parse_response(
            r#"{"bmr": 1800, "tdee": 1e30, "dailyCalorieGoal": 2500}"#,
            &gaining,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "PARSING_ERROR");
    }

    #[test]
    fn test_implausibly_small_kcal_is_rejected() {
        let err = parse_response(r#"{"bmr": 1, "tdee": 2, "dailyCalorieGoal": 2000}"#, &profile())
            .unwrap_err();
        assert_eq!(err.kind(), "PARSING_ERROR");
    }

    #[tokio::test]
    async fn test_huge_kcal_reply_falls_back() {
        let provider =
            MockProvider::replying(r#"{"bmr": 1800, "tdee": 1e30, "dailyCalorieGoal": 2500}"#);
        let result = resolver(&provider).resolve(&profile()).await.unwrap();
        assert_eq!(result.calculation_method, CalculationMethod::Manual);
        assert_eq!(result.tdee, 2129);
    }

    #[test]
    fn test_extract_skips_invalid_candidates() {
        let text = r#"Use {curly} braces like {"note": "a } inside", "n": {"x": 1}} ok"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["note"], "a } inside");
        assert_eq!(value["n"]["x"], 1);
    }

    #[test]
    fn test_extract_handles_escaped_quotes() {
        let text = r#"{"advice": "say \"hi\" {now}", "bmr": 1}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["bmr"], 1);
    }

    #[test]
    fn test_extract_none_without_object() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_prompt_embeds_profile_and_contract() {
        let mut p = profile();
        p.goals = vec!["build_muscle".to_string(), "energy".to_string()];
        let prompt = build_prompt(&p);
        assert!(prompt.contains("Age: 30 years"));
        assert!(prompt.contains("Gender: male"));
        assert!(prompt.contains("Height: 175 cm"));
        assert!(prompt.contains("Activity level: sedentary"));
        assert!(prompt.contains("Goals: build_muscle, energy"));
        assert!(prompt.contains("Weekly goal: -0.5 kg"));
        assert!(prompt.contains("1500 kcal"));
        for key in [
            "\"bmr\"",
            "\"tdee\"",
            "\"dailyCalorieGoal\"",
            "\"macroBreakdown\"",
            "\"personalizedAdvice\"",
            "\"timelineEstimate\"",
        ] {
            assert!(prompt.contains(key), "missing {key}");
        }
    }
}
