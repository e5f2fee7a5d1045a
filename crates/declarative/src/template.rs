//! Fact and parameter substitution
//!
//! Attribute strings may contain Jinja-style templates:
//!
//! ```text
//! INSTALL_K3S_VERSION={{ params.version }}
//! {% if facts['os.release.major'] | int >= 12 %}/boot/firmware{% else %}/boot{% endif %}
//! ```
//!
//! Undefined facts and parameters are errors, never empty strings.

use crate::class::ClassParams;
use crate::facts::Facts;
use crate::types::AttrValue;
use minijinja::{Environment, UndefinedBehavior, Value, context};

/// Renders attribute templates and evaluates `when` conditions
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    fn context(facts: &Facts, params: &ClassParams) -> Value {
        context! {
            facts => facts.as_map(),
            params => params,
        }
    }

    fn is_template(text: &str) -> bool {
        text.contains("{{") || text.contains("{%")
    }

    /// Render one string; plain strings are returned untouched
    pub fn render(
        &self,
        text: &str,
        facts: &Facts,
        params: &ClassParams,
    ) -> Result<String, minijinja::Error> {
        if !Self::is_template(text) {
            return Ok(text.to_string());
        }
        self.env.render_str(text, Self::context(facts, params))
    }

    /// Render every string inside an attribute value
    pub fn render_value(
        &self,
        value: &AttrValue,
        facts: &Facts,
        params: &ClassParams,
    ) -> Result<AttrValue, minijinja::Error> {
        Ok(match value {
            AttrValue::Str(s) => AttrValue::Str(self.render(s, facts, params)?),
            AttrValue::List(items) => AttrValue::List(
                items
                    .iter()
                    .map(|item| self.render(item, facts, params))
                    .collect::<Result<_, _>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Evaluate a boolean expression such as `facts['os.family'] == 'Debian'`
    pub fn eval_condition(
        &self,
        expr: &str,
        facts: &Facts,
        params: &ClassParams,
    ) -> Result<bool, minijinja::Error> {
        let compiled = self.env.compile_expression(expr)?;
        Ok(compiled.eval(Self::context(facts, params))?.is_true())
    }
}
