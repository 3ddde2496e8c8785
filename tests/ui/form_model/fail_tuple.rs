#![allow(dead_code)]

#[derive(formcore::form::FormModel)]
struct TupleForm(String);

fn main() {}
