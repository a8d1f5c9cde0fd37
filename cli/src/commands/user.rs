use anyhow::Result;

use mealflo_core::service::MealPlanService;

use super::helpers::{found, print_json};

pub(crate) fn cmd_user_create(svc: &MealPlanService, username: &str, json: bool) -> Result<()> {
    let (user, token) = svc.register_user(username)?;
    if json {
        print_json(&serde_json::json!({
            "id": user.id,
            "username": user.username,
            "token": token,
        }))?;
    } else {
        let name = &user.username;
        let id = user.id;
        println!("Created user {name} (id: {id})");
        println!("Token: {token}");
        println!("Include in requests: Authorization: Bearer {token}");
        eprintln!("The token is shown once; use `mealflo user rotate-token {name}` to replace it.");
    }
    Ok(())
}

pub(crate) fn cmd_user_rotate_token(
    svc: &MealPlanService,
    username: &str,
    json: bool,
) -> Result<()> {
    let token = found(svc.rotate_token(username), json)?;
    if json {
        print_json(&serde_json::json!({ "token": token }))?;
    } else {
        println!("New token: {token}");
        println!("The previous token no longer works.");
    }
    Ok(())
}
