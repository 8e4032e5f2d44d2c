use formdoc_core::{apply_json, parse, serialize, SerializeOptions};

fn main() {
    let form_source = r#"{% form id="contact" title="Contact" %}
{% group id="person" %}

{% string-field id="name" label="Name" required=true %}
{% /string-field %}

{% url-field id="homepage" label="Homepage" %}
{% /url-field %}

{% /group %}
{% /form %}
"#;

    let form = match parse(form_source, "contact.form.md") {
        Ok(form) => form,
        Err(e) => {
            eprintln!("Failed to parse form: {e:?}");
            return;
        }
    };

    let (form, result) = apply_json(
        &form,
        r#"[{"op": "set_string", "field_id": "name", "value": "John Doe"}]"#,
    );
    println!("Apply result:\n{}", serde_json::to_string_pretty(&result).unwrap());

    let values = form.to_json().unwrap();
    println!("Collected values:\n{values}");

    match serialize(&form, &SerializeOptions::default()) {
        Ok(text) => println!("Updated document:\n{text}"),
        Err(e) => eprintln!("Failed to serialize form: {e:?}"),
    }
}
