//! Transitive ownership checks.
//!
//! Every lookup walks from the requested row up to its owning user. A missing
//! row, a missing parent and a row owned by someone else all produce the same
//! `NotFound`, so callers learn nothing about other users' data.

use crate::db::Database;
use crate::error::{PlanError, PlanResult};
use crate::models::{DayGroup, Placement, Recipe, Week};

/// A reference to any user-owned entity by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Recipe(i64),
    Week(i64),
    Group(i64),
    Placement(i64),
}

/// The entity behind an [`EntityRef`], together with the parents that were
/// walked to prove ownership.
#[derive(Debug, Clone)]
pub enum Owned {
    Recipe(Recipe),
    Week(Week),
    Group { group: DayGroup, week: Week },
    Placement {
        placement: Placement,
        group: DayGroup,
        week: Week,
    },
}

pub fn resolve(db: &Database, user_id: i64, entity: EntityRef) -> PlanResult<Owned> {
    match entity {
        EntityRef::Recipe(id) => resolve_recipe(db, user_id, id).map(Owned::Recipe),
        EntityRef::Week(id) => resolve_week(db, user_id, id).map(Owned::Week),
        EntityRef::Group(id) => {
            resolve_group(db, user_id, id).map(|(group, week)| Owned::Group { group, week })
        }
        EntityRef::Placement(id) => {
            resolve_placement(db, user_id, id).map(|(placement, group, week)| Owned::Placement {
                placement,
                group,
                week,
            })
        }
    }
}

pub fn resolve_recipe(db: &Database, user_id: i64, recipe_id: i64) -> PlanResult<Recipe> {
    db.get_recipe(recipe_id)?
        .filter(|r| r.user_id == user_id)
        .ok_or(PlanError::NotFound("Recipe"))
}

pub fn resolve_week(db: &Database, user_id: i64, week_id: i64) -> PlanResult<Week> {
    db.get_week(week_id)?
        .filter(|w| w.user_id == user_id)
        .ok_or(PlanError::NotFound("Week"))
}

pub fn resolve_group(db: &Database, user_id: i64, group_id: i64) -> PlanResult<(DayGroup, Week)> {
    let not_found = || PlanError::NotFound("Meal group");
    let group = db.get_group(group_id)?.ok_or_else(not_found)?;
    let week = db
        .get_week(group.week_id)?
        .filter(|w| w.user_id == user_id)
        .ok_or_else(not_found)?;
    Ok((group, week))
}

pub fn resolve_placement(
    db: &Database,
    user_id: i64,
    placement_id: i64,
) -> PlanResult<(Placement, DayGroup, Week)> {
    let not_found = || PlanError::NotFound("Meal group recipe");
    let placement = db.get_placement(placement_id)?.ok_or_else(not_found)?;
    let (group, week) =
        resolve_group(db, user_id, placement.group_id).map_err(|err| match err {
            PlanError::NotFound(_) => not_found(),
            other => other,
        })?;
    Ok((placement, group, week))
}
