use crate::error::{PlanError, PlanResult};
use crate::models::{NewIngredient, NewRecipe, clean_text, parse_quantity};

/// Parse recipe CSV text into recipes ready to insert.
///
/// Recognised columns (case-insensitive): `title` (required per row),
/// `description`, `servings`, `ingredient_name` (or `ingredient` when blank),
/// `quantity`, `unit`, `notes`. Rows sharing a title become one recipe, in order of first
/// appearance; recipe-level fields come from that recipe's first row.
pub fn parse_recipes_csv(text: &str) -> PlanResult<Vec<NewRecipe>> {
    if text.trim().is_empty() {
        return Err(PlanError::invalid("csvText is required"));
    }

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| PlanError::invalid(format!("Failed to read CSV headers: {e}")))?
        .clone();
    if headers.iter().all(str::is_empty) {
        return Err(PlanError::invalid("CSV must include a header row"));
    }

    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let idx_title = col("title");
    let idx_description = col("description");
    let idx_servings = col("servings");
    let idx_ingredient_name = col("ingredient_name");
    let idx_ingredient = col("ingredient");
    let idx_quantity = col("quantity");
    let idx_unit = col("unit");
    let idx_notes = col("notes");

    let mut recipes: Vec<NewRecipe> = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let record = result
            .map_err(|e| PlanError::invalid(format!("Failed to parse CSV row {}: {e}", line_num + 2)))?;
        let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");

        let title = field(idx_title).trim();
        if title.is_empty() {
            continue;
        }

        let pos = if let Some(pos) = recipes.iter().position(|r| r.title == title) {
            pos
        } else {
            recipes.push(NewRecipe {
                title: title.to_string(),
                description: clean_text(Some(field(idx_description))),
                servings: Some(parse_servings(field(idx_servings))),
                ..NewRecipe::default()
            });
            recipes.len() - 1
        };

        let mut name = field(idx_ingredient_name).trim();
        if name.is_empty() {
            name = field(idx_ingredient).trim();
        }
        if name.is_empty() {
            continue;
        }
        recipes[pos].ingredients.push(NewIngredient {
            name: name.to_string(),
            quantity: parse_quantity(field(idx_quantity)),
            unit: clean_text(Some(field(idx_unit))),
            notes: clean_text(Some(field(idx_notes))),
        });
    }

    Ok(recipes)
}

/// Blank, unparsable or non-positive servings fall back to 1.
fn parse_servings(raw: &str) -> i64 {
    raw.trim().parse::<i64>().ok().filter(|s| *s >= 1).unwrap_or(1)
}
