use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Calorie profile (input) ---

pub const MIN_AGE: u32 = 13;
pub const MAX_AGE: u32 = 120;
pub const MIN_HEIGHT_CM: f64 = 100.0;
pub const MAX_HEIGHT_CM: f64 = 250.0;
pub const MIN_WEIGHT_KG: f64 = 30.0;
pub const MAX_WEIGHT_KG: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "male" | "m" => Ok(Self::Male),
            "female" | "f" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            _ => bail!("Invalid gender: {s}. Use male, female, or other"),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }

    /// Minimum safe daily intake in kcal.
    #[must_use]
    pub fn calorie_floor(self) -> i64 {
        match self {
            Self::Male => 1500,
            Self::Female | Self::Other => 1200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    LightlyActive,
    ModeratelyActive,
    VeryActive,
    ExtremelyActive,
}

pub const ACTIVITY_LEVELS: &[ActivityLevel] = &[
    ActivityLevel::Sedentary,
    ActivityLevel::LightlyActive,
    ActivityLevel::ModeratelyActive,
    ActivityLevel::VeryActive,
    ActivityLevel::ExtremelyActive,
];

impl ActivityLevel {
    pub fn parse(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        ACTIVITY_LEVELS
            .iter()
            .copied()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid activity level: {s}. Use sedentary, lightly_active, \
                     moderately_active, very_active, or extremely_active"
                )
            })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sedentary => "sedentary",
            Self::LightlyActive => "lightly_active",
            Self::ModeratelyActive => "moderately_active",
            Self::VeryActive => "very_active",
            Self::ExtremelyActive => "extremely_active",
        }
    }

    /// TDEE multiplier applied to BMR.
    #[must_use]
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Sedentary => 1.2,
            Self::LightlyActive => 1.375,
            Self::ModeratelyActive => 1.55,
            Self::VeryActive => 1.725,
            Self::ExtremelyActive => 1.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalorieProfile {
    pub age: u32,
    pub gender: Gender,
    pub height_cm: f64,
    pub current_weight_kg: f64,
    pub target_weight_kg: f64,
    pub activity_level: ActivityLevel,
    #[serde(default)]
    pub goals: Vec<String>,
    /// Positive = gain, negative = loss.
    #[serde(default)]
    pub weekly_goal_kg: f64,
}

impl CalorieProfile {
    #[must_use]
    pub fn wants_muscle(&self) -> bool {
        self.goals
            .iter()
            .any(|g| g.to_lowercase().contains("muscle"))
    }
}

/// Check every numeric field against plausible human ranges.
///
/// Returns the names of all violated fields; an empty vector means the profile is valid.
#[must_use]
pub fn profile_violations(profile: &CalorieProfile) -> Vec<String> {
    let mut fields = Vec::new();

    if !(MIN_AGE..=MAX_AGE).contains(&profile.age) {
        fields.push("age".to_string());
    }
    if !in_range(profile.height_cm, MIN_HEIGHT_CM, MAX_HEIGHT_CM) {
        fields.push("height_cm".to_string());
    }
    if !in_range(profile.current_weight_kg, MIN_WEIGHT_KG, MAX_WEIGHT_KG) {
        fields.push("current_weight_kg".to_string());
    }
    if !in_range(profile.target_weight_kg, MIN_WEIGHT_KG, MAX_WEIGHT_KG) {
        fields.push("target_weight_kg".to_string());
    }
    if !profile.weekly_goal_kg.is_finite() {
        fields.push("weekly_goal_kg".to_string());
    }

    fields
}

fn in_range(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && (min..=max).contains(&value)
}

// --- Calorie result (output) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    Ai,
    Manual,
}

impl CalculationMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ai" => Ok(Self::Ai),
            "manual" => Ok(Self::Manual),
            _ => bail!("Unknown calculation method: {s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroBreakdown {
    pub protein: i64,
    pub carbs: i64,
    pub fats: i64,
}

impl MacroBreakdown {
    pub const BALANCED: Self = Self {
        protein: 25,
        carbs: 45,
        fats: 30,
    };

    pub const MUSCLE_GAIN: Self = Self {
        protein: 30,
        carbs: 40,
        fats: 30,
    };

    /// Grams per day for a given calorie goal (4 kcal/g protein and carbs, 9 kcal/g fat).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn grams_for(&self, calories: i64) -> (f64, f64, f64) {
        let cal = calories as f64;
        (
            cal * self.protein as f64 / 100.0 / 4.0,
            cal * self.carbs as f64 / 100.0 / 4.0,
            cal * self.fats as f64 / 100.0 / 9.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalorieResult {
    pub bmr: i64,
    pub tdee: i64,
    pub daily_calorie_goal: i64,
    pub macro_breakdown: MacroBreakdown,
    pub personalized_advice: Vec<String>,
    pub timeline_estimate: String,
    pub calculation_method: CalculationMethod,
}

pub fn validate_macro_split(protein: i64, carbs: i64, fat: i64) -> Result<()> {
    if protein < 0 || carbs < 0 || fat < 0 {
        bail!("Macro percentages must be non-negative");
    }
    if protein > 100 || carbs > 100 || fat > 100 {
        bail!("Each macro percentage must be between 0 and 100");
    }
    let sum = protein + carbs + fat;
    if sum != 100 {
        bail!("Macro percentages must sum to 100 (got {sum})");
    }
    Ok(())
}

/// A resolved plan as stored in the local history.
#[derive(Debug, Clone, Serialize)]
pub struct SavedPlan {
    pub id: i64,
    pub uuid: String,
    pub profile: CalorieProfile,
    pub result: CalorieResult,
    pub created_at: String,
}

// --- Offline mutation queue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => bail!("Invalid operation: {s}. Use insert, update, or delete"),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    #[serde(default)]
    pub id: String,
    pub kind: OperationKind,
    pub target: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedOperation {
    #[must_use]
    pub fn new(kind: OperationKind, target: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target: target.to_string(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    #[must_use]
    pub fn insert(target: &str, record: Value) -> Self {
        Self::new(OperationKind::Insert, target, record)
    }

    #[must_use]
    pub fn update(target: &str, id: Value, partial_update: Value) -> Self {
        Self::new(
            OperationKind::Update,
            target,
            serde_json::json!({ "id": id, "partial_update": partial_update }),
        )
    }

    #[must_use]
    pub fn delete(target: &str, id: Value) -> Self {
        Self::new(OperationKind::Delete, target, serde_json::json!({ "id": id }))
    }

    /// The record id for update/delete payloads, rendered as a string.
    pub fn record_id(&self) -> Result<String> {
        match self.payload.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => bail!(
                "{} on '{}' is missing a string or numeric 'id'",
                self.kind.as_str(),
                self.target
            ),
        }
    }

    pub fn partial_update(&self) -> Result<&Value> {
        match self.payload.get("partial_update") {
            Some(v @ Value::Object(_)) => Ok(v),
            _ => bail!(
                "update on '{}' is missing an object 'partial_update'",
                self.target
            ),
        }
    }
}
