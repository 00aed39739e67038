#![allow(dead_code)]
use projectit_macros::Entity;

#[derive(Entity)]
struct Person {
    #[fetch(not_blank)]
    age: i64,
    #[fetch(id)]
    id: i64,
}

fn main() {}
