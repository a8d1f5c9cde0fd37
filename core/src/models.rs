use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PlanError, PlanResult};

/// A day-group never holds more than this many placements.
pub const MAX_PLACEMENTS_PER_GROUP: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub servings: i64,
    pub prep_min: Option<i64>,
    pub cook_min: Option<i64>,
    pub instructions: Option<String>,
    pub notes: Option<String>,
    pub is_public: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub id: i64,
    pub recipe_id: i64,
    pub name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub notes: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub ingredients: Vec<Ingredient>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIngredient {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_quantity")]
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecipe {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub servings: Option<i64>,
    pub prep_min: Option<i64>,
    pub cook_min: Option<i64>,
    pub instructions: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub ingredients: Vec<NewIngredient>,
}

/// Partial recipe update. Absent keys leave the column untouched; an explicit
/// `null` clears a nullable column.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::option_option)]
pub struct RecipePatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub servings: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub prep_min: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub cook_min: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub instructions: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
    pub is_public: Option<bool>,
    pub ingredients: Option<Vec<NewIngredient>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Week {
    pub id: i64,
    pub user_id: i64,
    pub week_start: NaiveDate,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayGroup {
    pub id: i64,
    pub week_id: i64,
    pub day: NaiveDate,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: i64,
    #[serde(rename = "mealGroupId")]
    pub group_id: i64,
    pub recipe_id: i64,
    pub planned_servings: i64,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDetail {
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<Recipe>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayGroupDetail {
    #[serde(flatten)]
    pub group: DayGroup,
    pub recipes: Vec<PlacementDetail>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekDetail {
    #[serde(flatten)]
    pub week: Week,
    pub meal_groups: Vec<DayGroupDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDayGroup {
    pub week_id: Option<i64>,
    pub day: Option<String>,
    pub name: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayGroupPatch {
    pub day: Option<String>,
    pub name: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlacement {
    pub recipe_id: Option<i64>,
    pub planned_servings: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementPatch {
    pub planned_servings: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingListItem {
    pub name: String,
    pub unit: Option<String>,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingList {
    pub week_id: i64,
    pub items: Vec<ShoppingListItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayOverview {
    pub date: NaiveDate,
    pub meal_groups: Vec<DayGroupDetail>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvImportSummary {
    pub created_count: usize,
    pub recipes: Vec<RecipeDetail>,
}

// --- Serde helpers ---

/// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`).
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Accepts a number, a numeric string, or null. Anything unparsable becomes
/// `None` rather than an error.
fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        Some(serde_json::Value::String(s)) => parse_quantity(&s),
        _ => None,
    })
}

// --- Validation ---

#[must_use]
pub fn parse_quantity(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[must_use]
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Trim an optional free-text field; blank becomes `None`.
#[must_use]
pub fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn parse_iso_date(value: Option<&str>, field: &str) -> PlanResult<NaiveDate> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PlanError::invalid(format!("{field} is required")))?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| PlanError::invalid(format!("Invalid {field} '{value}'. Use YYYY-MM-DD")))
}

pub fn validate_title(title: &str) -> PlanResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PlanError::invalid("Recipe title is required"));
    }
    Ok(title.to_string())
}

pub fn validate_servings(servings: i64, field: &str) -> PlanResult<i64> {
    if servings < 1 {
        return Err(PlanError::invalid(format!("{field} must be at least 1")));
    }
    Ok(servings)
}
