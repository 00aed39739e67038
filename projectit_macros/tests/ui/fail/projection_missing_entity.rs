#![allow(dead_code)]
use projectit_macros::Projection;

#[derive(Projection)]
struct FirstName {
    first_name: String,
}

fn main() {}
