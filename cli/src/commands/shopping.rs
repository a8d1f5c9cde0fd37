use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use mealflo_core::models::User;
use mealflo_core::service::MealPlanService;

use super::helpers::{format_quantity, found, parse_date, print_json};
use super::plan::print_groups;

pub(crate) fn cmd_shop(
    svc: &MealPlanService,
    user: &User,
    week_start: Option<String>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Unit")]
        unit: String,
    }

    let week_start = parse_date(week_start)?;
    let week = found(svc.find_week(user.id, week_start), json)?;
    let list = svc.shopping_list(user.id, week.week.id)?;

    if json {
        return print_json(&list);
    }

    if list.items.is_empty() {
        println!("Nothing to buy for the week of {week_start}");
        return Ok(());
    }

    let rows: Vec<ItemRow> = list
        .items
        .iter()
        .map(|item| ItemRow {
            name: item.name.clone(),
            quantity: format_quantity(Some(item.quantity)),
            unit: item.unit.clone().unwrap_or_default(),
        })
        .collect();

    println!("Shopping list for the week of {week_start}");
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(1)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_today(
    svc: &MealPlanService,
    user: &User,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let overview = svc.today_overview(user.id, date)?;

    if json {
        return print_json(&overview);
    }

    let day = date.format("%A %Y-%m-%d");
    println!("=== {day} ===");
    if overview.meal_groups.is_empty() {
        println!("  Nothing planned");
        return Ok(());
    }
    print_groups(&overview.meal_groups);
    Ok(())
}
