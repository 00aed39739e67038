#![allow(dead_code)]
use projectit_macros::{repository, Entity};

#[derive(Entity, Clone)]
struct User {
    #[fetch(id)]
    id: i64,
    email: String,
}

#[repository(entity = User, table = "users")]
mod user_repository {}

fn main() {}
