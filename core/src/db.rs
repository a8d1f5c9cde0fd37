use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::models::{
    DayGroup, DayGroupDetail, Ingredient, MAX_PLACEMENTS_PER_GROUP, NewIngredient, NewRecipe,
    Placement, PlacementDetail, Recipe, RecipeDetail, RecipePatch, User, Week, WeekDetail,
};

/// Message raised by the placement capacity trigger.
pub const CAPACITY_TRIGGER_MESSAGE: &str = "placement capacity exceeded";

const RECIPE_COLUMNS: &str = "id, user_id, title, description, servings, prep_min, cook_min, \
     instructions, notes, is_public, created_at, updated_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        // Cascades depend on this; it is per-connection and off by default.
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    token_hash TEXT UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
                    description TEXT,
                    servings INTEGER NOT NULL DEFAULT 1 CHECK (servings >= 1),
                    prep_min INTEGER,
                    cook_min INTEGER,
                    instructions TEXT,
                    notes TEXT,
                    is_public INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    quantity REAL,
                    unit TEXT,
                    notes TEXT,
                    sort_order INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS meal_plan_weeks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    week_start TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE (user_id, week_start)
                );

                CREATE TABLE IF NOT EXISTS meal_groups (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    week_id INTEGER NOT NULL REFERENCES meal_plan_weeks(id) ON DELETE CASCADE,
                    day TEXT NOT NULL,
                    name TEXT NOT NULL,
                    sort_order INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS meal_group_recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal_group_id INTEGER NOT NULL REFERENCES meal_groups(id) ON DELETE CASCADE,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    planned_servings INTEGER NOT NULL DEFAULT 1 CHECK (planned_servings >= 1),
                    sort_order INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_user ON recipes(user_id);
                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_weeks_user ON meal_plan_weeks(user_id);
                CREATE INDEX IF NOT EXISTS idx_meal_groups_week ON meal_groups(week_id);
                CREATE INDEX IF NOT EXISTS idx_meal_groups_day ON meal_groups(day);
                CREATE INDEX IF NOT EXISTS idx_meal_group_recipes_group ON meal_group_recipes(meal_group_id);
                CREATE INDEX IF NOT EXISTS idx_meal_group_recipes_recipe ON meal_group_recipes(recipe_id);

                CREATE TRIGGER IF NOT EXISTS meal_group_recipes_capacity
                BEFORE INSERT ON meal_group_recipes
                WHEN (SELECT COUNT(*) FROM meal_group_recipes
                      WHERE meal_group_id = NEW.meal_group_id) >= {MAX_PLACEMENTS_PER_GROUP}
                BEGIN
                    SELECT RAISE(ABORT, '{CAPACITY_TRIGGER_MESSAGE}');
                END;

                PRAGMA user_version = 1;"
            ))?;
        }

        Ok(())
    }

    /// Start a transaction on the shared connection. Statements issued through
    /// `self` while the guard is alive are part of it; dropping the guard
    /// without `commit` rolls everything back.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .context("failed to begin transaction")
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            servings: row.get(4)?,
            prep_min: row.get(5)?,
            cook_min: row.get(6)?,
            instructions: row.get(7)?,
            notes: row.get(8)?,
            is_public: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            recipe_id: row.get(1)?,
            name: row.get(2)?,
            quantity: row.get(3)?,
            unit: row.get(4)?,
            notes: row.get(5)?,
            sort_order: row.get(6)?,
        })
    }

    fn week_from_row(row: &rusqlite::Row) -> rusqlite::Result<Week> {
        Ok(Week {
            id: row.get(0)?,
            user_id: row.get(1)?,
            week_start: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn group_from_row(row: &rusqlite::Row) -> rusqlite::Result<DayGroup> {
        Ok(DayGroup {
            id: row.get(0)?,
            week_id: row.get(1)?,
            day: row.get(2)?,
            name: row.get(3)?,
            sort_order: row.get(4)?,
        })
    }

    fn placement_from_row(row: &rusqlite::Row) -> rusqlite::Result<Placement> {
        Ok(Placement {
            id: row.get(0)?,
            group_id: row.get(1)?,
            recipe_id: row.get(2)?,
            planned_servings: row.get(3)?,
            sort_order: row.get(4)?,
        })
    }

    // --- Users ---

    pub fn insert_user(&self, username: &str, token_hash: Option<&str>) -> Result<User> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO users (username, token_hash, created_at) VALUES (?1, ?2, ?3)",
                params![username, token_hash, now],
            )
            .with_context(|| format!("failed to insert user '{username}'"))?;
        let id = self.conn.last_insert_rowid();
        Ok(User {
            id,
            username: username.to_string(),
            created_at: now,
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                params![username],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE token_hash = ?1",
                params![token_hash],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_user_token_hash(&self, user_id: i64, token_hash: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET token_hash = ?1 WHERE id = ?2",
            params![token_hash, user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Recipes ---

    /// Insert a recipe and its ingredients. Callers are expected to hold a
    /// transaction when atomicity matters (see [`Database::begin`]).
    pub fn insert_recipe(&self, user_id: i64, recipe: &NewRecipe) -> Result<RecipeDetail> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO recipes (user_id, title, description, servings, prep_min, cook_min,
                    instructions, notes, is_public, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user_id,
                    recipe.title,
                    recipe.description,
                    recipe.servings.unwrap_or(1),
                    recipe.prep_min,
                    recipe.cook_min,
                    recipe.instructions,
                    recipe.notes,
                    recipe.is_public,
                    now,
                    now,
                ],
            )
            .context("failed to insert recipe")?;
        let id = self.conn.last_insert_rowid();
        self.insert_ingredients(id, &recipe.ingredients)?;
        self.get_recipe_detail(id)?
            .context("recipe missing after insert")
    }

    fn insert_ingredients(&self, recipe_id: i64, ingredients: &[NewIngredient]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO recipe_ingredients (recipe_id, name, quantity, unit, notes, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (idx, ing) in ingredients.iter().enumerate() {
            let sort_order = i64::try_from(idx).context("ingredient list too long")?;
            stmt.execute(params![
                recipe_id,
                ing.name,
                ing.quantity,
                ing.unit,
                ing.notes,
                sort_order
            ])?;
        }
        Ok(())
    }

    pub fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                &format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1"),
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub fn get_ingredients(&self, recipe_id: i64) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recipe_id, name, quantity, unit, notes, sort_order
             FROM recipe_ingredients
             WHERE recipe_id = ?1
             ORDER BY sort_order, id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_recipe_detail(&self, id: i64) -> Result<Option<RecipeDetail>> {
        let Some(recipe) = self.get_recipe(id)? else {
            return Ok(None);
        };
        let ingredients = self.get_ingredients(id)?;
        Ok(Some(RecipeDetail {
            recipe,
            ingredients,
        }))
    }

    pub fn list_recipes_for_user(&self, user_id: i64) -> Result<Vec<Recipe>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let recipes = stmt
            .query_map(params![user_id], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    /// Apply a recipe patch field by field. A supplied ingredient list replaces
    /// the existing set wholesale.
    pub fn update_recipe(&self, id: i64, patch: &RecipePatch) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        if let Some(ref title) = patch.title {
            self.conn.execute(
                "UPDATE recipes SET title = ?1 WHERE id = ?2",
                params![title, id],
            )?;
        }
        if let Some(ref description) = patch.description {
            self.conn.execute(
                "UPDATE recipes SET description = ?1 WHERE id = ?2",
                params![description, id],
            )?;
        }
        if let Some(servings) = patch.servings {
            self.conn.execute(
                "UPDATE recipes SET servings = ?1 WHERE id = ?2",
                params![servings, id],
            )?;
        }
        if let Some(prep_min) = patch.prep_min {
            self.conn.execute(
                "UPDATE recipes SET prep_min = ?1 WHERE id = ?2",
                params![prep_min, id],
            )?;
        }
        if let Some(cook_min) = patch.cook_min {
            self.conn.execute(
                "UPDATE recipes SET cook_min = ?1 WHERE id = ?2",
                params![cook_min, id],
            )?;
        }
        if let Some(ref instructions) = patch.instructions {
            self.conn.execute(
                "UPDATE recipes SET instructions = ?1 WHERE id = ?2",
                params![instructions, id],
            )?;
        }
        if let Some(ref notes) = patch.notes {
            self.conn.execute(
                "UPDATE recipes SET notes = ?1 WHERE id = ?2",
                params![notes, id],
            )?;
        }
        if let Some(is_public) = patch.is_public {
            self.conn.execute(
                "UPDATE recipes SET is_public = ?1 WHERE id = ?2",
                params![is_public, id],
            )?;
        }
        if let Some(ref ingredients) = patch.ingredients {
            self.conn.execute(
                "DELETE FROM recipe_ingredients WHERE recipe_id = ?1",
                params![id],
            )?;
            self.insert_ingredients(id, ingredients)?;
        }
        self.conn.execute(
            "UPDATE recipes SET updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Weeks ---

    /// Return the user's week starting on `week_start`, creating it if absent.
    /// Relies on the `(user_id, week_start)` unique key so concurrent callers
    /// converge on one row.
    pub fn get_or_insert_week(&self, user_id: i64, week_start: NaiveDate) -> Result<Week> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO meal_plan_weeks (user_id, week_start, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, week_start, now],
        )?;
        self.find_week(user_id, week_start)?
            .context("week missing after insert")
    }

    pub fn find_week(&self, user_id: i64, week_start: NaiveDate) -> Result<Option<Week>> {
        let week = self
            .conn
            .query_row(
                "SELECT id, user_id, week_start, created_at FROM meal_plan_weeks
                 WHERE user_id = ?1 AND week_start = ?2",
                params![user_id, week_start],
                Self::week_from_row,
            )
            .optional()?;
        Ok(week)
    }

    pub fn get_week(&self, id: i64) -> Result<Option<Week>> {
        let week = self
            .conn
            .query_row(
                "SELECT id, user_id, week_start, created_at FROM meal_plan_weeks WHERE id = ?1",
                params![id],
                Self::week_from_row,
            )
            .optional()?;
        Ok(week)
    }

    pub fn delete_week(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM meal_plan_weeks WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Day groups ---

    pub fn insert_group(
        &self,
        week_id: i64,
        day: NaiveDate,
        name: &str,
        sort_order: i64,
    ) -> Result<DayGroup> {
        self.conn
            .execute(
                "INSERT INTO meal_groups (week_id, day, name, sort_order) VALUES (?1, ?2, ?3, ?4)",
                params![week_id, day, name, sort_order],
            )
            .context("failed to insert meal group")?;
        Ok(DayGroup {
            id: self.conn.last_insert_rowid(),
            week_id,
            day,
            name: name.to_string(),
            sort_order,
        })
    }

    pub fn get_group(&self, id: i64) -> Result<Option<DayGroup>> {
        let group = self
            .conn
            .query_row(
                "SELECT id, week_id, day, name, sort_order FROM meal_groups WHERE id = ?1",
                params![id],
                Self::group_from_row,
            )
            .optional()?;
        Ok(group)
    }

    pub fn list_groups_for_week(&self, week_id: i64) -> Result<Vec<DayGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, week_id, day, name, sort_order FROM meal_groups
             WHERE week_id = ?1
             ORDER BY day, sort_order, id",
        )?;
        let groups = stmt
            .query_map(params![week_id], Self::group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    /// Every group scheduled on `day` across all of the user's weeks.
    pub fn list_groups_for_user_on(&self, user_id: i64, day: NaiveDate) -> Result<Vec<DayGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT g.id, g.week_id, g.day, g.name, g.sort_order
             FROM meal_groups g
             JOIN meal_plan_weeks w ON g.week_id = w.id
             WHERE w.user_id = ?1 AND g.day = ?2
             ORDER BY g.sort_order, g.id",
        )?;
        let groups = stmt
            .query_map(params![user_id, day], Self::group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    pub fn update_group(
        &self,
        id: i64,
        day: Option<NaiveDate>,
        name: Option<&str>,
        sort_order: Option<i64>,
    ) -> Result<()> {
        if let Some(day) = day {
            self.conn.execute(
                "UPDATE meal_groups SET day = ?1 WHERE id = ?2",
                params![day, id],
            )?;
        }
        if let Some(name) = name {
            self.conn.execute(
                "UPDATE meal_groups SET name = ?1 WHERE id = ?2",
                params![name, id],
            )?;
        }
        if let Some(sort_order) = sort_order {
            self.conn.execute(
                "UPDATE meal_groups SET sort_order = ?1 WHERE id = ?2",
                params![sort_order, id],
            )?;
        }
        Ok(())
    }

    pub fn delete_group(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM meal_groups WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Placements ---

    pub fn count_placements(&self, group_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM meal_group_recipes WHERE meal_group_id = ?1",
            params![group_id],
            |row| row.get(0),
        )?;
        usize::try_from(count).context("negative placement count")
    }

    pub fn insert_placement(
        &self,
        group_id: i64,
        recipe_id: i64,
        planned_servings: i64,
        sort_order: i64,
    ) -> Result<Placement> {
        self.conn
            .execute(
                "INSERT INTO meal_group_recipes (meal_group_id, recipe_id, planned_servings, sort_order)
                 VALUES (?1, ?2, ?3, ?4)",
                params![group_id, recipe_id, planned_servings, sort_order],
            )
            .context("failed to insert meal group recipe")?;
        Ok(Placement {
            id: self.conn.last_insert_rowid(),
            group_id,
            recipe_id,
            planned_servings,
            sort_order,
        })
    }

    pub fn get_placement(&self, id: i64) -> Result<Option<Placement>> {
        let placement = self
            .conn
            .query_row(
                "SELECT id, meal_group_id, recipe_id, planned_servings, sort_order
                 FROM meal_group_recipes WHERE id = ?1",
                params![id],
                Self::placement_from_row,
            )
            .optional()?;
        Ok(placement)
    }

    pub fn list_placements_for_group(&self, group_id: i64) -> Result<Vec<Placement>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meal_group_id, recipe_id, planned_servings, sort_order
             FROM meal_group_recipes
             WHERE meal_group_id = ?1
             ORDER BY sort_order, id",
        )?;
        let placements = stmt
            .query_map(params![group_id], Self::placement_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(placements)
    }

    pub fn list_placements_for_week(&self, week_id: i64) -> Result<Vec<Placement>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.meal_group_id, p.recipe_id, p.planned_servings, p.sort_order
             FROM meal_group_recipes p
             JOIN meal_groups g ON p.meal_group_id = g.id
             WHERE g.week_id = ?1
             ORDER BY g.day, g.sort_order, g.id, p.sort_order, p.id",
        )?;
        let placements = stmt
            .query_map(params![week_id], Self::placement_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(placements)
    }

    pub fn update_placement(
        &self,
        id: i64,
        planned_servings: Option<i64>,
        sort_order: Option<i64>,
    ) -> Result<()> {
        if let Some(planned_servings) = planned_servings {
            self.conn.execute(
                "UPDATE meal_group_recipes SET planned_servings = ?1 WHERE id = ?2",
                params![planned_servings, id],
            )?;
        }
        if let Some(sort_order) = sort_order {
            self.conn.execute(
                "UPDATE meal_group_recipes SET sort_order = ?1 WHERE id = ?2",
                params![sort_order, id],
            )?;
        }
        Ok(())
    }

    pub fn delete_placement(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM meal_group_recipes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Nested views ---

    pub fn placement_detail(&self, placement: Placement) -> Result<PlacementDetail> {
        let recipe = self.get_recipe(placement.recipe_id)?;
        Ok(PlacementDetail { placement, recipe })
    }

    pub fn group_detail(&self, group: DayGroup) -> Result<DayGroupDetail> {
        let recipes = self
            .list_placements_for_group(group.id)?
            .into_iter()
            .map(|p| self.placement_detail(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(DayGroupDetail { group, recipes })
    }

    pub fn week_detail(&self, week: Week) -> Result<WeekDetail> {
        let meal_groups = self
            .list_groups_for_week(week.id)?
            .into_iter()
            .map(|g| self.group_detail(g))
            .collect::<Result<Vec<_>>>()?;
        Ok(WeekDetail { week, meal_groups })
    }
}

/// True when `err` came from the placement capacity trigger.
#[must_use]
pub fn is_capacity_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains(CAPACITY_TRIGGER_MESSAGE)
        )
    })
}

/// True when `err` is a UNIQUE/constraint failure reported by `SQLite`.
#[must_use]
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    })
}
