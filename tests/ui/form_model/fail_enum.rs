#![allow(dead_code)]

#[derive(formcore::form::FormModel)]
enum ChoiceForm {
    Email,
    Phone,
}

fn main() {}
