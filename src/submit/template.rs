use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        // SAFETY: constant pattern, checked by the tests below
        Regex::new(r"\$(?:(\$)|([_A-Za-z][_A-Za-z0-9]*)|\{([_A-Za-z][_A-Za-z0-9]*)\})")
            .expect("placeholder pattern is valid")
    })
}

/// Replace `$name` and `${name}` with values from `vars`; `$$` yields `$`.
///
/// Unknown names and stray `$` are left exactly as written, never an error.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    render(template, vars, true)
}

/// Like [`substitute`] but keeps `$$` as written, for text that is handed
/// to a shell which gives `$$` its own meaning.
pub fn substitute_names(template: &str, vars: &HashMap<String, String>) -> String {
    render(template, vars, false)
}

fn render(template: &str, vars: &HashMap<String, String>, unescape_dollars: bool) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                return if unescape_dollars { "$" } else { "$$" }.to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match name.and_then(|n| vars.get(n)) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
