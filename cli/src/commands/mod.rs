mod helpers;
mod plan;
mod recipe;
mod shopping;
mod user;

pub(crate) use plan::{cmd_plan_copy, cmd_plan_group, cmd_plan_place, cmd_plan_show};
pub(crate) use recipe::{cmd_recipe_delete, cmd_recipe_import, cmd_recipe_list, cmd_recipe_show};
pub(crate) use shopping::{cmd_shop, cmd_today};
pub(crate) use user::{cmd_user_create, cmd_user_rotate_token};
