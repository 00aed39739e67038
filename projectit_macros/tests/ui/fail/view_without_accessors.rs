#![allow(dead_code)]
use projectit_macros::view;

struct Person;

#[view(entity = Person)]
trait NothingView {}

fn main() {}
