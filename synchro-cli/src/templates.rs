//! Starter files for `synchro new`, embedded at compile time.

const APP_MAIN_JS: &str = include_str!("../templates/app/main.js");
const APP_PACKAGE_JSON: &str = include_str!("../templates/app/package.json");

const NAME_PLACEHOLDER: &str = "{{{name}}}";
const DESCRIPTION_PLACEHOLDER: &str = "{{{description}}}";

/// Files of a new app, in the order they are written.
pub const APP_TEMPLATE: &[(&str, &str)] = &[
    ("main.js", APP_MAIN_JS),
    ("package.json", APP_PACKAGE_JSON),
];

/// Render the new-app template for `name` and `description`.
///
/// Values substituted into `.json` files are JSON-escaped.
pub fn render_app_template(name: &str, description: &str) -> Vec<(&'static str, String)> {
    APP_TEMPLATE
        .iter()
        .map(|(file, content)| {
            let rendered = if file.ends_with(".json") {
                content
                    .replace(NAME_PLACEHOLDER, &json_escape(name))
                    .replace(DESCRIPTION_PLACEHOLDER, &json_escape(description))
            } else {
                content
                    .replace(NAME_PLACEHOLDER, name)
                    .replace(DESCRIPTION_PLACEHOLDER, description)
            };
            (*file, rendered)
        })
        .collect()
}

fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::from(value).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
