#![allow(dead_code)]

#[derive(formcore::form::FormModel)]
struct GenericForm<T> {
    value: T,
}

fn main() {}
