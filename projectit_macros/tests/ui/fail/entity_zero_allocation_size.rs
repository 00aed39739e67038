#![allow(dead_code)]
use projectit_macros::Entity;

#[derive(Entity)]
#[entity(table = "person", allocation_size = 0)]
struct Person {
    first_name: String,
    #[fetch(id)]
    id: i64,
}

fn main() {}
