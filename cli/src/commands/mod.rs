mod helpers;
mod ingredient;
mod iteration;
mod recipe;
mod status;

pub(crate) use ingredient::{cmd_ingredient_add, cmd_ingredient_list};
pub(crate) use iteration::{cmd_iteration_add, cmd_iteration_list};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_show,
};
pub(crate) use status::cmd_status;
