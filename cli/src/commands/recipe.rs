use anyhow::{Context, Result};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealflo_core::models::User;
use mealflo_core::service::MealPlanService;

use super::helpers::{format_quantity, found, print_json, truncate};

pub(crate) fn cmd_recipe_list(svc: &MealPlanService, user: &User, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Servings")]
        servings: i64,
        #[tabled(rename = "Prep")]
        prep: String,
        #[tabled(rename = "Cook")]
        cook: String,
    }

    let recipes = svc.list_recipes(user.id)?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        return print_json(&recipes);
    }

    let minutes = |m: Option<i64>| m.map_or("-".into(), |m| format!("{m} min"));
    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            title: truncate(&r.title, 40),
            servings: r.servings,
            prep: minutes(r.prep_min),
            cook: minutes(r.cook_min),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_recipe_show(
    svc: &MealPlanService,
    user: &User,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    let detail = found(svc.get_recipe(user.id, recipe_id), json)?;
    if json {
        return print_json(&detail);
    }

    let recipe = &detail.recipe;
    let title = &recipe.title;
    let servings = recipe.servings;
    println!("=== {title} ===");
    if let Some(ref description) = recipe.description {
        println!("  {description}");
    }
    println!("  Servings: {servings}\n");

    println!("  INGREDIENTS:");
    for ing in &detail.ingredients {
        let qty = format_quantity(ing.quantity);
        let unit = ing.unit.as_deref().unwrap_or("");
        let amount = format!("{qty} {unit}");
        let amount = amount.trim();
        let name = &ing.name;
        match ing.notes.as_deref() {
            Some(notes) => println!("    {amount} {name} ({notes})"),
            None => println!("    {amount} {name}"),
        }
    }

    if let Some(ref instructions) = recipe.instructions {
        println!("\n  INSTRUCTIONS:");
        for line in instructions.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}

pub(crate) fn cmd_recipe_import(
    svc: &MealPlanService,
    user: &User,
    file: &std::path::Path,
    json: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = svc.import_recipes_csv(user.id, &text)?;

    if json {
        return print_json(&summary);
    }

    let count = summary.created_count;
    println!("Imported {count} recipe(s):");
    for detail in &summary.recipes {
        let id = detail.recipe.id;
        let title = &detail.recipe.title;
        let n = detail.ingredients.len();
        println!("  {id}: {title} ({n} ingredients)");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_delete(
    svc: &MealPlanService,
    user: &User,
    recipe_id: i64,
    json: bool,
) -> Result<()> {
    found(svc.delete_recipe(user.id, recipe_id), json)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": recipe_id }));
    } else {
        println!("Deleted recipe {recipe_id}");
    }
    Ok(())
}
