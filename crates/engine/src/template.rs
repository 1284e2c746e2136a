//! Template resolution and rendering.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use uuid::Uuid;

use orderalert_common::error::AppError;
use orderalert_common::types::Template;

use crate::store::TemplateStore;

/// Template for `key`, preferring the shop's own over the global default.
/// Missing and inactive templates are both `TemplateNotFound`.
pub async fn resolve(
    store: &dyn TemplateStore,
    key: &str,
    shop_id: Uuid,
) -> Result<Template, AppError> {
    match store.find_template(key, shop_id).await? {
        Some(t) if t.active => Ok(t),
        Some(_) => Err(AppError::TemplateNotFound(format!(
            "template '{}' is inactive",
            key
        ))),
        None => Err(AppError::TemplateNotFound(format!(
            "no template '{}' for shop {} and no default",
            key, shop_id
        ))),
    }
}

/// Substitute every `{{name}}` placeholder in `body`.
///
/// Fails with `TemplateRender` if a placeholder or a declared variable has no
/// value, or if a `{{` is never closed. Never emits a literal placeholder.
pub fn render(
    body: &str,
    required: &[String],
    variables: &BTreeMap<String, String>,
) -> Result<String, AppError> {
    let mut missing: BTreeSet<String> = required
        .iter()
        .filter(|name| !variables.contains_key(name.as_str()))
        .cloned()
        .collect();

    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            return Err(AppError::TemplateRender(
                "unterminated '{{' placeholder".to_string(),
            ));
        };

        let name = after_open[..close].trim();
        match variables.get(name) {
            Some(value) => out.push_str(value),
            None => {
                missing.insert(name.to_string());
            }
        }
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);

    if !missing.is_empty() {
        let names: Vec<String> = missing.into_iter().collect();
        return Err(AppError::TemplateRender(format!(
            "missing variables: {}",
            names.join(", ")
        )));
    }

    Ok(out)
}

/// Render a resolved template.
pub fn render_template(
    template: &Template,
    variables: &BTreeMap<String, String>,
) -> Result<String, AppError> {
    render(&template.body, &template.variables, variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let body = "Hi {{first_name}}, order #{{ order_number }} ({{currency}} {{total}})";
        let out = render(
            body,
            &[],
            &vars(&[
                ("first_name", "Ayesha"),
                ("order_number", "1001"),
                ("currency", "PKR"),
                ("total", "2899.00"),
            ]),
        )
        .unwrap();
        assert_eq!(out, "Hi Ayesha, order #1001 (PKR 2899.00)");
    }

    #[test]
    fn test_render_is_deterministic() {
        let body = "{{a}}-{{b}}-{{a}}";
        let v = vars(&[("a", "1"), ("b", "2")]);
        assert_eq!(render(body, &[], &v).unwrap(), render(body, &[], &v).unwrap());
        assert_eq!(render(body, &[], &v).unwrap(), "1-2-1");
    }

    #[test]
    fn test_missing_placeholder_value_fails() {
        let err = render("Track: {{tracking_url}}", &[], &vars(&[])).unwrap_err();
        match err {
            AppError::TemplateRender(msg) => assert!(msg.contains("tracking_url")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_declared_variable_fails_even_if_unused() {
        let err = render("Static text", &["order_number".to_string()], &vars(&[])).unwrap_err();
        assert!(matches!(err, AppError::TemplateRender(_)));
    }

    #[test]
    fn test_unterminated_placeholder_fails() {
        let err = render("Hello {{first_name", &[], &vars(&[("first_name", "A")])).unwrap_err();
        assert!(matches!(err, AppError::TemplateRender(_)));
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let out = render("{{a}}", &[], &vars(&[("a", "{{b}}")])).unwrap();
        assert_eq!(out, "{{b}}");
    }

    #[tokio::test]
    async fn test_resolve_rejects_inactive_and_missing() {
        let store = MemoryStore::new();
        let shop = Uuid::new_v4();
        store
            .add_template(None, "order_created_v1", "x", &[], true)
            .await;
        store
            .add_template(Some(shop), "order_created_v1", "y", &[], false)
            .await;

        let err = resolve(&store, "order_created_v1", shop).await.unwrap_err();
        assert!(matches!(err, AppError::TemplateNotFound(_)));

        let other = resolve(&store, "order_created_v1", Uuid::new_v4()).await.unwrap();
        assert_eq!(other.body, "x");

        let err = resolve(&store, "nope", shop).await.unwrap_err();
        assert!(matches!(err, AppError::TemplateNotFound(_)));
    }
}
