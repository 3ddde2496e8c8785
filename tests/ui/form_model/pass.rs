use formcore::form::{FieldKey, FormEngine, FormModel};

#[derive(serde::Serialize, serde::Deserialize, formcore::form::FormModel)]
struct SignupForm {
    email: String,
    age: u32,
    r#type: Option<String>,
}

const EMAIL: FieldKey = SignupForm::fields_const().email();

impl SignupForm {
    const fn fields_const() -> SignupFormFields {
        SignupFormFields
    }
}

fn main() {
    let fields = SignupForm::fields();
    assert_eq!(fields.email().as_str(), "email");
    assert_eq!(fields.r#type().as_str(), "type");
    assert_eq!(EMAIL, fields.email());
    assert_eq!(SignupForm::field_names(), &["email", "age", "type"]);

    let model = SignupForm {
        email: "a@b.io".to_string(),
        age: 30,
        r#type: None,
    };
    let engine = FormEngine::from_model(&model).expect("engine from model");
    engine
        .set_field_value(fields.age(), 31)
        .expect("write age");
    let round_trip: SignupForm = engine.state_as().expect("state as model");
    assert_eq!(round_trip.email, "a@b.io");
    assert_eq!(round_trip.age, 31);
    assert_eq!(round_trip.r#type, None);
}
