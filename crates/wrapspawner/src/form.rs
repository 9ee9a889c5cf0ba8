//! Options form rendering and parsing.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
//! Unknown placeholders are left in place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::context::SpawnContext;
use crate::error::{SpawnerError, SpawnerResult};
use crate::profile::Profile;
use crate::providers::ProfileProvider;

/// Form field carrying the requested profile key.
pub const PROFILE_FIELD: &str = "profile";

/// Templates for the profile selection form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Outer markup; `{input_template}` receives the rendered options.
    pub form_template: String,
    /// Markup per profile; `{display}`, `{key}`, `{type}` and `{first}`.
    pub input_template: String,
    /// Substituted for `{first}` on the first profile.
    pub first_template: String,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            form_template: concat!(
                "<label for=\"profile\">Select a job profile:</label>\n",
                "<select class=\"form-control\" name=\"profile\" required autofocus>\n",
                "{input_template}\n",
                "</select>\n",
            )
            .to_string(),
            input_template: "\n<option value=\"{key}\" {first}>{display}</option>".to_string(),
            first_template: "selected".to_string(),
        }
    }
}

impl FormConfig {
    /// Render the form for a catalog.
    pub fn render(&self, catalog: &[Profile]) -> SpawnerResult<String> {
        if catalog.is_empty() {
            return Err(SpawnerError::EmptyCatalog);
        }

        let options: String = catalog
            .iter()
            .enumerate()
            .map(|(index, profile)| {
                let first = if index == 0 { self.first_template.as_str() } else { "" };
                fill(
                    &self.input_template,
                    &[
                        ("display", &profile.display_name),
                        ("key", &profile.key),
                        ("type", &profile.launcher),
                        ("first", first),
                    ],
                )
            })
            .collect();

        Ok(fill(&self.form_template, &[("input_template", &options)]))
    }
}

/// Single-pass placeholder substitution.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                if let Some((_, value)) = values.iter().find(|(key, _)| *key == name) {
                    out.push_str(value);
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}

/// Options submitted with a spawn request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOptions {
    /// Requested profile key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl UserOptions {
    pub fn profile(key: impl Into<String>) -> Self {
        Self {
            profile: Some(key.into()),
        }
    }
}

/// Extract user options from submitted form data.
///
/// Takes the first `profile` value, or the first catalog key when the form
/// carried none.
pub fn options_from_form(
    formdata: &HashMap<String, Vec<String>>,
    catalog: &[Profile],
) -> SpawnerResult<UserOptions> {
    let submitted = formdata
        .get(PROFILE_FIELD)
        .and_then(|values| values.first())
        .cloned();

    let profile = match submitted {
        Some(key) => key,
        None => catalog
            .first()
            .map(|p| p.key.clone())
            .ok_or(SpawnerError::EmptyCatalog)?,
    };
    Ok(UserOptions::profile(profile))
}

/// Form renderer that caches output for providers with a fixed catalog.
#[derive(Debug, Default)]
pub struct OptionsForm {
    config: FormConfig,
    cached: OnceCell<String>,
}

impl OptionsForm {
    pub fn new(config: FormConfig) -> Self {
        Self {
            config,
            cached: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// Render the form for the provider's current catalog.
    pub async fn render(
        &self,
        provider: &dyn ProfileProvider,
        ctx: &SpawnContext,
    ) -> SpawnerResult<String> {
        if provider.is_dynamic() {
            return self.config.render(&provider.profiles(ctx).await);
        }

        self.cached
            .get_or_try_init(|| async { self.config.render(&provider.profiles(ctx).await) })
            .await
            .cloned()
    }
}
