use anyhow::Result;

use mealflo_core::models::{DayGroupDetail, NewDayGroup, NewPlacement, User, WeekDetail};
use mealflo_core::service::MealPlanService;

use super::helpers::{found, parse_date, print_json};

pub(crate) fn cmd_plan_show(
    svc: &MealPlanService,
    user: &User,
    week_start: Option<String>,
    json: bool,
) -> Result<()> {
    let week_start = parse_date(week_start)?;
    let week = found(svc.find_week(user.id, week_start), json)?;
    if json {
        return print_json(&week);
    }
    print_week(&week);
    Ok(())
}

pub(crate) fn cmd_plan_copy(
    svc: &MealPlanService,
    user: &User,
    from: String,
    to: String,
    json: bool,
) -> Result<()> {
    let from = parse_date(Some(from))?;
    let to = parse_date(Some(to))?;
    let source = found(svc.find_week(user.id, from), json)?;
    let target = svc.copy_week(user.id, source.week.id, Some(&to.to_string()))?;
    if json {
        return print_json(&target);
    }
    let groups = source.meal_groups.len();
    println!("Copied {groups} meal group(s) from week of {from} to week of {to}");
    print_week(&target);
    Ok(())
}

pub(crate) fn cmd_plan_group(
    svc: &MealPlanService,
    user: &User,
    week_start: String,
    day: String,
    name: String,
    json: bool,
) -> Result<()> {
    let week_start = parse_date(Some(week_start))?;
    let day = parse_date(Some(day))?;
    let week = svc.get_or_create_week(user.id, Some(&week_start.to_string()))?;
    let group = svc.create_day_group(
        user.id,
        &NewDayGroup {
            week_id: Some(week.week.id),
            day: Some(day.to_string()),
            name: Some(name),
            sort_order: None,
        },
    )?;
    if json {
        return print_json(&group);
    }
    let id = group.group.id;
    let name = &group.group.name;
    println!("Created meal group {name} on {day} (id: {id})");
    Ok(())
}

pub(crate) fn cmd_plan_place(
    svc: &MealPlanService,
    user: &User,
    group_id: i64,
    recipe_id: i64,
    servings: Option<i64>,
    json: bool,
) -> Result<()> {
    let placement = found(
        svc.add_placement(
            user.id,
            group_id,
            &NewPlacement {
                recipe_id: Some(recipe_id),
                planned_servings: servings,
                sort_order: None,
            },
        ),
        json,
    )?;
    if json {
        return print_json(&placement);
    }
    let title = placement.recipe.as_ref().map_or("?", |r| r.title.as_str());
    let planned = placement.placement.planned_servings;
    println!("Added {title} ({planned} servings) to meal group {group_id}");
    Ok(())
}

pub(super) fn print_groups(groups: &[DayGroupDetail]) {
    for detail in groups {
        let group = &detail.group;
        let day = group.day.format("%a %Y-%m-%d");
        let name = &group.name;
        let id = group.id;
        println!("  {day}  {name} [group {id}]");
        if detail.recipes.is_empty() {
            println!("      (empty)");
        }
        for p in &detail.recipes {
            let title = p.recipe.as_ref().map_or("?", |r| r.title.as_str());
            let servings = p.placement.planned_servings;
            println!("      - {title} x{servings}");
        }
    }
}

fn print_week(week: &WeekDetail) {
    let start = week.week.week_start;
    let id = week.week.id;
    println!("=== Week of {start} [week {id}] ===");
    if week.meal_groups.is_empty() {
        println!("  No meal groups planned");
        return;
    }
    print_groups(&week.meal_groups);
}
