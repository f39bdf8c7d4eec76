use calmform::form::{FormController, FormModel, FormOptions, FormValue, Value};

#[derive(Clone, calmform::form::FormModel)]
struct DemoForm {
    email: String,
    subscribed: bool,
    aliases: Vec<String>,
}

fn main() {
    let fields = DemoForm::fields();
    assert_eq!(fields.email().to_string(), "email");

    let model = DemoForm {
        email: "a@calm.form".to_string(),
        subscribed: false,
        aliases: Vec::new(),
    };
    let value = model.to_value();
    assert!(matches!(value, Value::Object(_)));

    let controller = FormController::from_model(&model, FormOptions::default()).unwrap();
    controller.set_data(fields.email(), "b@calm.form").unwrap();
    controller.set_data(fields.subscribed(), true).unwrap();
    let updated = controller.model::<DemoForm>().unwrap();
    assert_eq!(updated.email, "b@calm.form");
    assert!(updated.subscribed);
    assert!(updated.aliases.is_empty());
}
