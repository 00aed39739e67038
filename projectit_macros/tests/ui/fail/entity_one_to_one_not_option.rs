#![allow(dead_code)]
use projectit_macros::Entity;

#[derive(Entity, Clone)]
struct Address {
    #[fetch(id)]
    id: i64,
}

#[derive(Entity)]
struct Person {
    #[fetch(one_to_one)]
    address: Address,
    #[fetch(id)]
    id: i64,
}

fn main() {}
