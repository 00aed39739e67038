#![allow(dead_code)]
use projectit_macros::{repository, Entity};

#[derive(Entity, Clone)]
struct User {
    #[fetch(id)]
    id: i64,
    score: i64,
}

#[repository(entity = User, finders(find_by_score: u8))]
mod user_repository {}

fn main() {}
