use std::collections::{BTreeMap, HashMap};

use crate::db::Database;
use crate::error::PlanResult;
use crate::models::{Ingredient, ShoppingList, ShoppingListItem};
use crate::ownership;

/// Merge key: trimmed lowercase name and unit. `None` means "no unit".
type ItemKey = (String, Option<String>);

struct Tally {
    name: String,
    unit: Option<String>,
    quantity: f64,
}

/// Collapse ingredient lines into one row per (name, unit).
///
/// Quantities are summed as given, without serving scaling. Absent quantities
/// count as zero but still produce a row. The output does not depend on the
/// input order: totals are sums, display spellings are the smallest seen, and
/// rows are sorted by lowercase name then lowercase unit.
#[must_use]
pub fn aggregate<'a, I>(ingredients: I) -> Vec<ShoppingListItem>
where
    I: IntoIterator<Item = &'a Ingredient>,
{
    let mut tallies: BTreeMap<ItemKey, Tally> = BTreeMap::new();

    for ing in ingredients {
        let name = ing.name.trim();
        if name.is_empty() {
            continue;
        }
        let unit = ing.unit.as_deref().map(str::trim).filter(|u| !u.is_empty());
        let key = (name.to_lowercase(), unit.map(str::to_lowercase));
        let amount = ing.quantity.unwrap_or(0.0);

        tallies
            .entry(key)
            .and_modify(|t| {
                t.quantity = saturating_add(t.quantity, amount);
                if name < t.name.as_str() {
                    t.name = name.to_string();
                }
                if let Some(u) = unit {
                    if t.unit.as_deref().is_some_and(|current| u < current) {
                        t.unit = Some(u.to_string());
                    }
                }
            })
            .or_insert_with(|| Tally {
                name: name.to_string(),
                unit: unit.map(str::to_string),
                quantity: amount,
            });
    }

    let mut items: Vec<ShoppingListItem> = tallies
        .into_values()
        .map(|t| ShoppingListItem {
            name: t.name,
            unit: t.unit,
            quantity: round3(t.quantity),
        })
        .collect();

    items.sort_by(|a, b| {
        let ka = (a.name.to_lowercase(), unit_sort_key(a.unit.as_deref()));
        let kb = (b.name.to_lowercase(), unit_sort_key(b.unit.as_deref()));
        ka.cmp(&kb)
    });
    items
}

fn unit_sort_key(unit: Option<&str>) -> String {
    unit.map(str::to_lowercase).unwrap_or_default()
}

/// Totals stay finite so they always serialize as numbers.
fn saturating_add(total: f64, amount: f64) -> f64 {
    (total + amount).clamp(-f64::MAX, f64::MAX)
}

fn round3(value: f64) -> f64 {
    let scaled = value * 1000.0;
    // Values this large have no fractional digits left to round.
    if !scaled.is_finite() {
        return value;
    }
    let rounded = scaled.round() / 1000.0;
    // Avoid serializing -0.0.
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Build the shopping list for one of the user's weeks.
pub fn build_shopping_list(db: &Database, user_id: i64, week_id: i64) -> PlanResult<ShoppingList> {
    let week = ownership::resolve_week(db, user_id, week_id)?;

    // A recipe placed several times contributes its ingredients once per
    // placement; fetch each ingredient list only once.
    let mut by_recipe: HashMap<i64, Vec<Ingredient>> = HashMap::new();
    let mut lines: Vec<Ingredient> = Vec::new();

    for placement in db.list_placements_for_week(week.id)? {
        if !by_recipe.contains_key(&placement.recipe_id) {
            let owned = db
                .get_recipe(placement.recipe_id)?
                .is_some_and(|r| r.user_id == user_id);
            let ingredients = if owned {
                db.get_ingredients(placement.recipe_id)?
            } else {
                Vec::new()
            };
            by_recipe.insert(placement.recipe_id, ingredients);
        }
        if let Some(ingredients) = by_recipe.get(&placement.recipe_id) {
            lines.extend(ingredients.iter().cloned());
        }
    }

    let items = aggregate(&lines);
    tracing::debug!(week_id, lines = lines.len(), items = items.len(), "built shopping list");
    Ok(ShoppingList { week_id, items })
}
