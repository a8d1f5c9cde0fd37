use std::path::Path;

use chrono::NaiveDate;

use crate::csv_import;
use crate::db::{self, Database};
use crate::error::{PlanError, PlanResult};
use crate::models::{
    CsvImportSummary, DayGroupDetail, DayGroupPatch, MAX_PLACEMENTS_PER_GROUP, NewDayGroup,
    NewIngredient, NewPlacement, NewRecipe, PlacementDetail, PlacementPatch, Recipe, RecipeDetail,
    RecipePatch, ShoppingList, TodayOverview, User, WeekDetail, clean_text, normalize_username,
    parse_iso_date, validate_servings, validate_title,
};
use crate::ownership;
use crate::shopping;
use crate::token;

/// Entry point for every user-scoped operation.
///
/// All methods take the acting user's id and check ownership before touching
/// anything, so a failed check never leaves partial writes behind.
pub struct MealPlanService {
    db: Database,
}

impl MealPlanService {
    pub fn new(db_path: &Path) -> PlanResult<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> PlanResult<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    // --- Users ---

    /// Create a user and issue their first bearer token. The token is only
    /// ever returned here; the store keeps its digest.
    pub fn register_user(&self, username: &str) -> PlanResult<(User, String)> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(PlanError::invalid("username is required"));
        }
        if self.db.get_user_by_username(&username)?.is_some() {
            return Err(PlanError::Conflict(format!(
                "Username '{username}' is already taken"
            )));
        }
        let token = token::generate_token();
        let user = self
            .db
            .insert_user(&username, Some(&token::hash_token(&token)))
            .map_err(|err| {
                if db::is_constraint_violation(&err) {
                    PlanError::Conflict(format!("Username '{username}' is already taken"))
                } else {
                    PlanError::Store(err)
                }
            })?;
        tracing::info!(user_id = user.id, username = %user.username, "registered user");
        Ok((user, token))
    }

    pub fn authenticate(&self, token: &str) -> PlanResult<Option<User>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.db.get_user_by_token_hash(&token::hash_token(token))?)
    }

    /// Replace the user's token. The previous one stops working immediately.
    pub fn rotate_token(&self, username: &str) -> PlanResult<String> {
        let user = self
            .get_user_by_username(username)?
            .ok_or(PlanError::NotFound("User"))?;
        let token = token::generate_token();
        self.db
            .set_user_token_hash(user.id, &token::hash_token(&token))?;
        tracing::info!(user_id = user.id, "rotated token");
        Ok(token)
    }

    /// Get or create a user without issuing a token.
    pub fn ensure_user(&self, username: &str) -> PlanResult<User> {
        let username = normalize_username(username);
        if username.is_empty() {
            return Err(PlanError::invalid("username is required"));
        }
        if let Some(user) = self.db.get_user_by_username(&username)? {
            return Ok(user);
        }
        let user = self.db.insert_user(&username, None)?;
        tracing::info!(user_id = user.id, username = %user.username, "created user");
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> PlanResult<Option<User>> {
        Ok(self
            .db
            .get_user_by_username(&normalize_username(username))?)
    }

    // --- Recipes ---

    pub fn list_recipes(&self, user_id: i64) -> PlanResult<Vec<Recipe>> {
        Ok(self.db.list_recipes_for_user(user_id)?)
    }

    pub fn get_recipe(&self, user_id: i64, recipe_id: i64) -> PlanResult<RecipeDetail> {
        let recipe = ownership::resolve_recipe(&self.db, user_id, recipe_id)?;
        let ingredients = self.db.get_ingredients(recipe.id)?;
        Ok(RecipeDetail {
            recipe,
            ingredients,
        })
    }

    pub fn create_recipe(&self, user_id: i64, input: NewRecipe) -> PlanResult<RecipeDetail> {
        let input = prepare_new_recipe(input)?;
        let tx = self.db.begin()?;
        let detail = self.db.insert_recipe(user_id, &input)?;
        tx.commit()?;
        tracing::info!(
            user_id,
            recipe_id = detail.recipe.id,
            ingredients = detail.ingredients.len(),
            "created recipe"
        );
        Ok(detail)
    }

    pub fn update_recipe(
        &self,
        user_id: i64,
        recipe_id: i64,
        mut patch: RecipePatch,
    ) -> PlanResult<RecipeDetail> {
        let recipe = ownership::resolve_recipe(&self.db, user_id, recipe_id)?;

        if let Some(ref title) = patch.title {
            patch.title = Some(validate_title(title)?);
        }
        if let Some(servings) = patch.servings {
            validate_servings(servings, "servings")?;
        }
        validate_minutes(patch.prep_min.flatten(), "prepMin")?;
        validate_minutes(patch.cook_min.flatten(), "cookMin")?;
        patch.ingredients = patch.ingredients.map(normalize_ingredients);

        let tx = self.db.begin()?;
        self.db.update_recipe(recipe.id, &patch)?;
        tx.commit()?;
        tracing::info!(user_id, recipe_id, "updated recipe");

        self.get_recipe(user_id, recipe_id)
    }

    pub fn delete_recipe(&self, user_id: i64, recipe_id: i64) -> PlanResult<()> {
        let recipe = ownership::resolve_recipe(&self.db, user_id, recipe_id)?;
        self.db.delete_recipe(recipe.id)?;
        tracing::info!(user_id, recipe_id, "deleted recipe");
        Ok(())
    }

    /// Create one recipe per distinct title in the CSV text. Either every
    /// recipe is created or none is.
    pub fn import_recipes_csv(&self, user_id: i64, csv_text: &str) -> PlanResult<CsvImportSummary> {
        let parsed = csv_import::parse_recipes_csv(csv_text)?;

        let tx = self.db.begin()?;
        let mut recipes = Vec::with_capacity(parsed.len());
        for recipe in parsed {
            let recipe = prepare_new_recipe(recipe)?;
            recipes.push(self.db.insert_recipe(user_id, &recipe)?);
        }
        tx.commit()?;

        tracing::info!(user_id, created = recipes.len(), "imported recipes from csv");
        Ok(CsvImportSummary {
            created_count: recipes.len(),
            recipes,
        })
    }

    // --- Weeks ---

    /// Idempotent: repeated calls for the same user and date return the same
    /// week.
    pub fn get_or_create_week(
        &self,
        user_id: i64,
        week_start: Option<&str>,
    ) -> PlanResult<WeekDetail> {
        let week_start = parse_iso_date(week_start, "weekStart")?;
        let week = self.db.get_or_insert_week(user_id, week_start)?;
        tracing::debug!(user_id, week_id = week.id, %week_start, "resolved week");
        Ok(self.db.week_detail(week)?)
    }

    /// Look up an existing week by its start date without creating it.
    pub fn find_week(&self, user_id: i64, week_start: NaiveDate) -> PlanResult<WeekDetail> {
        let week = self
            .db
            .find_week(user_id, week_start)?
            .ok_or(PlanError::NotFound("Week"))?;
        Ok(self.db.week_detail(week)?)
    }

    pub fn get_week(&self, user_id: i64, week_id: i64) -> PlanResult<WeekDetail> {
        let week = ownership::resolve_week(&self.db, user_id, week_id)?;
        Ok(self.db.week_detail(week)?)
    }

    pub fn delete_week(&self, user_id: i64, week_id: i64) -> PlanResult<()> {
        let week = ownership::resolve_week(&self.db, user_id, week_id)?;
        self.db.delete_week(week.id)?;
        tracing::info!(user_id, week_id, "deleted week");
        Ok(())
    }

    /// Clone every group and placement of the source week into the week
    /// starting at `target_start`. Each group keeps its day offset from the
    /// week start. Recipes are shared, not cloned.
    pub fn copy_week(
        &self,
        user_id: i64,
        source_week_id: i64,
        target_start: Option<&str>,
    ) -> PlanResult<WeekDetail> {
        let source = ownership::resolve_week(&self.db, user_id, source_week_id)?;
        let target_start = parse_iso_date(target_start, "weekStart")?;

        let tx = self.db.begin()?;
        let target = self.db.get_or_insert_week(user_id, target_start)?;
        let mut copied_groups = 0usize;
        let mut copied_placements = 0usize;

        for group in self.db.list_groups_for_week(source.id)? {
            let offset = group.day - source.week_start;
            let day = target_start
                .checked_add_signed(offset)
                .ok_or_else(|| PlanError::invalid("weekStart is out of range"))?;
            let new_group = self
                .db
                .insert_group(target.id, day, &group.name, group.sort_order)?;
            copied_groups += 1;

            for placement in self.db.list_placements_for_group(group.id)? {
                self.db
                    .insert_placement(
                        new_group.id,
                        placement.recipe_id,
                        placement.planned_servings,
                        placement.sort_order,
                    )
                    .map_err(placement_insert_error)?;
                copied_placements += 1;
            }
        }
        tx.commit()?;

        tracing::info!(
            user_id,
            source_week_id,
            target_week_id = target.id,
            groups = copied_groups,
            placements = copied_placements,
            "copied week"
        );
        Ok(self.db.week_detail(target)?)
    }

    // --- Day groups ---

    pub fn create_day_group(&self, user_id: i64, input: &NewDayGroup) -> PlanResult<DayGroupDetail> {
        let week_id = input
            .week_id
            .ok_or_else(|| PlanError::invalid("weekId is required"))?;
        let day = input
            .day
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| PlanError::invalid("day is required"))?;
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlanError::invalid("name is required"))?;

        let week = ownership::resolve_week(&self.db, user_id, week_id)?;
        let day = parse_iso_date(Some(day), "day")?;

        let group = self
            .db
            .insert_group(week.id, day, name, input.sort_order.unwrap_or(0))?;
        tracing::info!(user_id, week_id, group_id = group.id, %day, "created meal group");
        Ok(self.db.group_detail(group)?)
    }

    pub fn update_day_group(
        &self,
        user_id: i64,
        group_id: i64,
        patch: &DayGroupPatch,
    ) -> PlanResult<DayGroupDetail> {
        let (group, _week) = ownership::resolve_group(&self.db, user_id, group_id)?;

        let name = match patch.name.as_deref().map(str::trim) {
            Some("") => return Err(PlanError::invalid("name must not be empty")),
            other => other,
        };
        let day = match patch.day.as_deref() {
            Some(day) => Some(parse_iso_date(Some(day), "day")?),
            None => None,
        };

        self.db
            .update_group(group.id, day, name, patch.sort_order)?;
        tracing::info!(user_id, group_id, "updated meal group");

        let group = self
            .db
            .get_group(group.id)?
            .ok_or(PlanError::NotFound("Meal group"))?;
        Ok(self.db.group_detail(group)?)
    }

    pub fn delete_day_group(&self, user_id: i64, group_id: i64) -> PlanResult<()> {
        let (group, _week) = ownership::resolve_group(&self.db, user_id, group_id)?;
        self.db.delete_group(group.id)?;
        tracing::info!(user_id, group_id, "deleted meal group");
        Ok(())
    }

    // --- Placements ---

    /// Place one of the user's recipes in a group. Groups hold at most
    /// [`MAX_PLACEMENTS_PER_GROUP`] placements.
    pub fn add_placement(
        &self,
        user_id: i64,
        group_id: i64,
        input: &NewPlacement,
    ) -> PlanResult<PlacementDetail> {
        let (group, _week) = ownership::resolve_group(&self.db, user_id, group_id)?;
        let recipe_id = input
            .recipe_id
            .ok_or_else(|| PlanError::invalid("recipeId is required"))?;
        let recipe = ownership::resolve_recipe(&self.db, user_id, recipe_id)?;

        let tx = self.db.begin()?;
        let count = self.db.count_placements(group.id)?;
        if count >= MAX_PLACEMENTS_PER_GROUP {
            tracing::debug!(user_id, group_id, count, "meal group is full");
            return Err(PlanError::CapacityExceeded {
                limit: MAX_PLACEMENTS_PER_GROUP,
            });
        }
        let planned_servings = validate_servings(
            input.planned_servings.unwrap_or(recipe.servings),
            "plannedServings",
        )?;
        let sort_order = match input.sort_order {
            Some(order) => order,
            None => i64::try_from(count).map_err(anyhow::Error::from)?,
        };
        let placement = self
            .db
            .insert_placement(group.id, recipe.id, planned_servings, sort_order)
            .map_err(placement_insert_error)?;
        tx.commit()?;

        tracing::info!(
            user_id,
            group_id,
            recipe_id,
            placement_id = placement.id,
            "added recipe to meal group"
        );
        Ok(PlacementDetail {
            placement,
            recipe: Some(recipe),
        })
    }

    pub fn update_placement(
        &self,
        user_id: i64,
        placement_id: i64,
        patch: &PlacementPatch,
    ) -> PlanResult<PlacementDetail> {
        let (placement, _group, _week) =
            ownership::resolve_placement(&self.db, user_id, placement_id)?;
        if let Some(servings) = patch.planned_servings {
            validate_servings(servings, "plannedServings")?;
        }

        self.db
            .update_placement(placement.id, patch.planned_servings, patch.sort_order)?;
        tracing::info!(user_id, placement_id, "updated meal group recipe");

        let placement = self
            .db
            .get_placement(placement.id)?
            .ok_or(PlanError::NotFound("Meal group recipe"))?;
        Ok(self.db.placement_detail(placement)?)
    }

    pub fn delete_placement(&self, user_id: i64, placement_id: i64) -> PlanResult<()> {
        let (placement, _group, _week) =
            ownership::resolve_placement(&self.db, user_id, placement_id)?;
        self.db.delete_placement(placement.id)?;
        tracing::info!(user_id, placement_id, "deleted meal group recipe");
        Ok(())
    }

    // --- Derived views ---

    pub fn shopping_list(&self, user_id: i64, week_id: i64) -> PlanResult<ShoppingList> {
        shopping::build_shopping_list(&self.db, user_id, week_id)
    }

    /// The user's groups scheduled on `date`, from whichever weeks hold them.
    pub fn today_overview(&self, user_id: i64, date: NaiveDate) -> PlanResult<TodayOverview> {
        let meal_groups = self
            .db
            .list_groups_for_user_on(user_id, date)?
            .into_iter()
            .map(|g| self.db.group_detail(g))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(TodayOverview { date, meal_groups })
    }
}

fn placement_insert_error(err: anyhow::Error) -> PlanError {
    if db::is_capacity_violation(&err) {
        PlanError::CapacityExceeded {
            limit: MAX_PLACEMENTS_PER_GROUP,
        }
    } else {
        PlanError::Store(err)
    }
}

fn prepare_new_recipe(mut input: NewRecipe) -> PlanResult<NewRecipe> {
    input.title = validate_title(&input.title)?;
    input.servings = Some(validate_servings(input.servings.unwrap_or(1), "servings")?);
    validate_minutes(input.prep_min, "prepMin")?;
    validate_minutes(input.cook_min, "cookMin")?;
    input.ingredients = normalize_ingredients(input.ingredients);
    Ok(input)
}

fn validate_minutes(value: Option<i64>, field: &str) -> PlanResult<()> {
    match value {
        Some(v) if v < 0 => Err(PlanError::invalid(format!("{field} must not be negative"))),
        _ => Ok(()),
    }
}

fn normalize_ingredients(ingredients: Vec<NewIngredient>) -> Vec<NewIngredient> {
    ingredients
        .into_iter()
        .map(|ing| NewIngredient {
            name: ing.name.trim().to_string(),
            quantity: ing.quantity.filter(|q| q.is_finite()),
            unit: clean_text(ing.unit.as_deref()),
            notes: clean_text(ing.notes.as_deref()),
        })
        .collect()
}
