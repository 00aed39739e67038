#![allow(dead_code)]
use projectit_macros::Entity;

#[derive(Entity)]
struct Person {
    #[fetch(nullable)]
    nickname: String,
    #[fetch(id)]
    id: i64,
}

fn main() {}
