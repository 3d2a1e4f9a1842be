use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const MEAL_TIMES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

/// Deserialize a macro field leniently: `null`, a numeric string, or any
/// other malformed value becomes NaN instead of failing the whole blob.
/// Corrupted stored data must surface as a detectable non-finite value,
/// not as a load error that takes the rest of the dataset down with it.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServingUnit {
    #[default]
    G,
    Ml,
}

impl ServingUnit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::G => "g",
            Self::Ml => "ml",
        }
    }
}

/// A food definition. Built-in foods are process-wide and immutable;
/// custom foods belong to a single account. Macro values are per 100
/// units of `serving_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodItem {
    pub id: i64,
    pub name: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub fat: f64,
    #[serde(default)]
    pub serving_unit: ServingUnit,
    #[serde(default)]
    pub is_custom: bool,
}

/// A logged food. `food_id` is a weak reference — the food may have been
/// deleted since, which is why the name and the portion-scaled macros are
/// snapshotted at log time. Entries are never edited in place, only
/// created and deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyEntry {
    pub id: i64,
    pub food_id: i64,
    pub name: String,
    pub portion_size: f64,
    pub unit: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub calories: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub protein: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub carbs: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub fat: f64,
    /// ISO date, `YYYY-MM-DD`.
    pub date: String,
    pub meal_time: String,
}

/// Daily macro targets. A singleton per account, always overwritten
/// whole — there is no partial patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goals {
    pub calories: i64,
    pub protein: i64,
    pub carbs: i64,
    pub fat: i64,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            calories: 2200,
            protein: 165,
            carbs: 275,
            fat: 73,
        }
    }
}

/// The full per-user dataset as held by the remote store. Absent fields
/// fall back to empty collections and default goals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    #[serde(default)]
    pub custom_foods: Vec<FoodItem>,
    #[serde(default)]
    pub daily_entries: Vec<DailyEntry>,
    #[serde(default)]
    pub goals: Goals,
}

/// Raw food form input, kept as strings so validation can report every
/// problem instead of dying on the first unparsable field.
#[derive(Debug, Clone, Default)]
pub struct FoodDraft {
    pub name: String,
    pub calories: String,
    pub protein: String,
    pub carbs: String,
    pub fat: String,
}

impl FoodDraft {
    /// Build a `FoodItem` from a draft that already passed validation.
    /// Returns `None` when any numeric field fails to parse.
    #[must_use]
    pub fn to_food(&self, id: i64, serving_unit: ServingUnit, is_custom: bool) -> Option<FoodItem> {
        Some(FoodItem {
            id,
            name: crate::validate::sanitize_string(&self.name),
            calories: self.calories.trim().parse().ok()?,
            protein: self.protein.trim().parse().ok()?,
            carbs: self.carbs.trim().parse().ok()?,
            fat: self.fat.trim().parse().ok()?,
            serving_unit,
            is_custom,
        })
    }
}

/// Calorie-calculator form input. Numeric fields that failed to parse in
/// the form layer arrive as NaN and fail the range checks naturally; the
/// two choice fields stay raw so "nothing selected" is validatable.
#[derive(Debug, Clone)]
pub struct CalculatorData {
    pub age: f64,
    /// Raw form value, expected `male` or `female`.
    pub gender: String,
    /// Raw form value, expected `imperial` or `metric`.
    pub unit_system: String,
    pub height_feet: f64,
    pub height_inches: f64,
    pub weight_lbs: f64,
    pub height_cm: f64,
    pub weight_kg: f64,
}
